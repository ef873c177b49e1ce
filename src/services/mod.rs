pub mod images;
pub mod queue;
pub mod retry;
pub mod scratch;
pub mod storage;
pub mod transform;
pub mod validation;
pub mod worker;
