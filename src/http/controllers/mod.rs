pub mod data_controller;
pub mod datasets_controller;
pub mod health_controller;
pub mod operations_controller;
pub mod uploads_controller;

pub use data_controller::get_data;
pub use datasets_controller::{create_dataset, get_dataset, get_headers, list_datasets};
pub use health_controller::health_handler;
pub use operations_controller::get_operation;
pub use uploads_controller::{upload_dataset, MAX_UPLOAD_SIZE};
