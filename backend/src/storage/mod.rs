pub mod compress;
pub mod s3_service;
