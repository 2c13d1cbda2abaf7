pub mod alerts;
pub mod cameras;
pub mod incidents;
pub mod invitations;
pub mod jobs;
pub mod reports;
pub mod users;
