pub mod models;
pub mod repository;

pub use models::{PaymentRecord, PaymentStatus};
pub use repository::{PaymentQuery, PaymentRepository};
