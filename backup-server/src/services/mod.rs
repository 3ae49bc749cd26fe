pub mod continuation;
