pub mod api_keys;
pub mod appointments;
pub mod attachments;
pub mod family;
pub mod records;
pub mod sweep_lease;
