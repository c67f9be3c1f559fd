pub mod result_service;
