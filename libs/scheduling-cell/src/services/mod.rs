pub mod assignment;
pub mod directory;
pub mod lifecycle;
pub mod locks;
pub mod notifications;
pub mod occupancy;
pub mod patients;
pub mod recalculation;

pub use assignment::{candidate_times, next_free_time};
pub use directory::SlotDirectoryService;
pub use lifecycle::RequestLifecycleService;
pub use locks::SlotLockRegistry;
pub use notifications::NotificationService;
pub use occupancy::OccupancyService;
pub use patients::PatientDirectoryService;
pub use recalculation::{plan_assignments, PlannedAssignment, QueueRecalculationService};
