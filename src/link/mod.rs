pub mod ack_vector;
pub mod context;
pub mod driver;
pub mod gap_detector;
pub mod peer_store;
