pub mod alert;
pub mod dispatch_record;
pub mod status;
