//! Socket addresses of the control plane.

/// Bind addresses for the broker's six sockets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    /// SUB bind; viewers publish parameter updates here.
    pub parameter_ingress: String,
    /// PUB bind; servers subscribe here filtered by category.
    pub parameter_egress: String,
    /// SUB bind; viewers publish action requests here.
    pub action_ingress: String,
    /// PUB bind; the vehicle process subscribes here.
    pub action_egress: String,
    /// SUB bind; the vehicle process publishes its state here.
    pub vehicle_status_ingress: String,
    /// PUB bind; frames, detections, and state fan out to viewers here.
    pub viewer_egress: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            parameter_ingress: "tcp://*:5559".to_string(),
            parameter_egress: "tcp://*:5560".to_string(),
            action_ingress: "tcp://*:5558".to_string(),
            action_egress: "tcp://*:5561".to_string(),
            vehicle_status_ingress: "tcp://*:5562".to_string(),
            viewer_egress: "tcp://*:5557".to_string(),
        }
    }
}

impl Endpoints {
    /// Loopback endpoints on six consecutive ports starting at `base_port`,
    /// in the same order as the fields. Used by tests to avoid clashing
    /// with a live deployment.
    pub fn loopback(base_port: u16) -> Self {
        let url = |offset: u16| format!("tcp://127.0.0.1:{}", base_port + offset);
        Self {
            parameter_ingress: url(0),
            parameter_egress: url(1),
            action_ingress: url(2),
            action_egress: url(3),
            vehicle_status_ingress: url(4),
            viewer_egress: url(5),
        }
    }
}

/// Turns a bind address into the matching connect address.
pub fn connect_addr(bind: &str) -> String {
    bind.replace('*', "localhost")
}
