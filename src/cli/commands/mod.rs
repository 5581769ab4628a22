pub mod doctor;
pub mod lifecycle;
