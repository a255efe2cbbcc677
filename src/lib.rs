pub mod external_services;
pub mod simulation;
