pub mod events;
pub mod fuzzy;
pub mod leaderboard;
pub mod ledger;
pub mod match_log;
pub mod pipeline;
pub mod rating;
pub mod replay;
pub mod store;
