/// Asks the host to smooth over a pose jump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionRequest {
    /// Database pose jumped to.
    pub pose_id: usize,
    pub blend_time: f32,
}

/// Receives inertialization requests of a node.
pub trait TransitionSink {
    fn request_transition(&mut self, _request: TransitionRequest) {}
}

impl TransitionSink for () {}

impl TransitionSink for Vec<TransitionRequest> {
    fn request_transition(&mut self, request: TransitionRequest) {
        self.push(request);
    }
}
