pub mod app_config;
pub mod booking_repo;
pub mod commuter_repo;
pub mod database;
pub mod events;
pub mod gateway;
pub mod mailer;
pub mod object_store;
pub mod otp_repo;
pub mod parcel_repo;
pub mod payment_repo;
pub mod redis_repo;
pub mod schedule_repo;

pub use booking_repo::StoreBookingRepository;
pub use commuter_repo::StoreDirectory;
pub use database::DbClient;
pub use events::EventProducer;
pub use gateway::HttpPaymentGateway;
pub use mailer::SmtpMailer;
pub use object_store::S3ObjectStorage;
pub use otp_repo::StoreOtpRepository;
pub use parcel_repo::StoreParcelRepository;
pub use payment_repo::StorePaymentRepository;
pub use redis_repo::RedisClient;
pub use schedule_repo::StoreScheduleQueue;
