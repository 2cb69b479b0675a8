pub mod task_rating;
pub mod weekly_cycle;
