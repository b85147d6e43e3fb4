pub mod datasets_controller;
pub mod features_controller;
pub mod health_controller;
