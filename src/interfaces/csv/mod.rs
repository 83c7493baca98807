pub mod payment_writer;
