//! Ticket queueing and deployment strategies

pub mod strategy;
pub mod ticket;

pub use strategy::{strategy_for, DirectSessionStrategy, MatchmadeSessionStrategy, QueueStrategy};
pub use ticket::{QueuePosition, TicketQueue};
