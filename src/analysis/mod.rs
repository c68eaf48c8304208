pub mod monte_carlo;
pub mod optimizer;
pub mod walk_forward;
