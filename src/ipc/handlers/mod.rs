pub mod attendance;
pub mod auth;
pub mod core;
pub mod faculty;
pub mod leaves;
pub mod reports;
pub mod sessions;
pub mod setup;
pub mod students;
pub mod subjects;
pub mod timetable;
