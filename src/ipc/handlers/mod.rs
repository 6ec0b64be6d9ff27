pub mod attendance;
pub mod auth;
pub mod backup;
pub mod core;
pub mod departments;
pub mod faculty;
pub mod fees;
pub mod marks;
pub mod students;
pub mod subjects;
