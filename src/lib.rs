pub mod crwm;
pub mod linalg;
pub mod manifold;
pub mod manifolds;
pub mod newton;
pub mod rattle;
pub mod stats;
pub mod thug;
