use tandem_core::net::messages::{CandidateInit, SignalingMessage};

type SdpCallback = Box<dyn FnMut(String) + Send>;
type CandidateCallback = Box<dyn FnMut(CandidateInit) + Send>;
type EventCallback = Box<dyn FnMut() + Send>;

/// Peer-connection callbacks for inbound signaling.
///
/// ```ignore
/// let handlers = SignalingHandlers::new()
///     .on_ready(|| start_negotiation())
///     .on_offer(|sdp| apply_remote_offer(sdp))
///     .on_reconnect(|| rebuild_peer_connection());
/// ```
#[derive(Default)]
pub struct SignalingHandlers {
    offer: Option<SdpCallback>,
    answer: Option<SdpCallback>,
    candidate: Option<CandidateCallback>,
    ready: Option<EventCallback>,
    reconnect: Option<EventCallback>,
}

impl SignalingHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_offer(mut self, f: impl FnMut(String) + Send + 'static) -> Self {
        self.offer = Some(Box::new(f));
        self
    }

    pub fn on_answer(mut self, f: impl FnMut(String) + Send + 'static) -> Self {
        self.answer = Some(Box::new(f));
        self
    }

    pub fn on_candidate(mut self, f: impl FnMut(CandidateInit) + Send + 'static) -> Self {
        self.candidate = Some(Box::new(f));
        self
    }

    /// Both room slots are filled; negotiation may begin.
    pub fn on_ready(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.ready = Some(Box::new(f));
        self
    }

    /// Fired on every successful connection after the first.
    pub fn on_reconnect(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.reconnect = Some(Box::new(f));
        self
    }

    /// Hand a message to its callback. Returns false if nothing handled it.
    pub fn dispatch(&mut self, msg: SignalingMessage) -> bool {
        match msg {
            SignalingMessage::Offer { sdp } => call_with(&mut self.offer, sdp),
            SignalingMessage::Answer { sdp } => call_with(&mut self.answer, sdp),
            SignalingMessage::Candidate { candidate } => call_with(&mut self.candidate, candidate),
            SignalingMessage::Ready => call(&mut self.ready),
            SignalingMessage::Ping => false,
        }
    }

    pub fn notify_reconnected(&mut self) -> bool {
        call(&mut self.reconnect)
    }
}

fn call_with<T>(slot: &mut Option<Box<dyn FnMut(T) + Send>>, arg: T) -> bool {
    match slot {
        Some(f) => {
            f(arg);
            true
        },
        None => false,
    }
}

fn call(slot: &mut Option<EventCallback>) -> bool {
    match slot {
        Some(f) => {
            f();
            true
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn dispatches_each_variant_to_its_callback() {
        let (tx, rx) = mpsc::channel::<String>();
        let (t1, t2, t3, t4) = (tx.clone(), tx.clone(), tx.clone(), tx);
        let mut handlers = SignalingHandlers::new()
            .on_offer(move |sdp| t1.send(format!("offer:{sdp}")).unwrap())
            .on_answer(move |sdp| t2.send(format!("answer:{sdp}")).unwrap())
            .on_candidate(move |c| t3.send(format!("candidate:{}", c["sdpMid"])).unwrap())
            .on_ready(move || t4.send("ready".to_string()).unwrap());

        let mut candidate = CandidateInit::new();
        candidate.insert("sdpMid".into(), "0".into());

        assert!(handlers.dispatch(SignalingMessage::Ready));
        assert!(handlers.dispatch(SignalingMessage::Offer { sdp: "o".into() }));
        assert!(handlers.dispatch(SignalingMessage::Answer { sdp: "a".into() }));
        assert!(handlers.dispatch(SignalingMessage::Candidate { candidate }));

        let got: Vec<String> = rx.try_iter().collect();
        assert_eq!(got, vec!["ready", "offer:o", "answer:a", "candidate:\"0\""]);
    }

    #[test]
    fn missing_callbacks_report_unhandled() {
        let mut handlers = SignalingHandlers::new();
        assert!(!handlers.dispatch(SignalingMessage::Ready));
        assert!(!handlers.dispatch(SignalingMessage::Offer { sdp: "o".into() }));
        assert!(!handlers.dispatch(SignalingMessage::Ping));
        assert!(!handlers.notify_reconnected());
    }

    #[test]
    fn reconnect_callback_fires() {
        let (tx, rx) = mpsc::channel();
        let mut handlers = SignalingHandlers::new().on_reconnect(move || tx.send(()).unwrap());
        assert!(handlers.notify_reconnected());
        assert!(handlers.notify_reconnected());
        assert_eq!(rx.try_iter().count(), 2);
    }
}
