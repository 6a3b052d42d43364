mod destination;
mod model;

pub use destination::{DestinationVae, DestinationVaeConfig};
pub use model::{PlanningPredictor, PlanningPredictorConfig};
