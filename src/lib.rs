// Session coordination engine for the shared "closest guess" quiz.
// All game state lives in one transactional document; this crate only
// decides what to write into it and when.

pub mod catalog;
pub mod engine;
pub mod store;
pub mod types;
