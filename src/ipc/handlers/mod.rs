pub mod calendar;
pub mod core;
pub mod marks;
pub mod rank;
pub mod records;
pub mod roster;
pub mod setup;
