mod backend;
pub mod memory;
mod supabase;

pub use backend::{AuthBackend, Backend, DataBackend, SignUpResponse};
pub use memory::{sample_poems, Failure, MemoryBackend, Operation};
pub use supabase::SupabaseClient;
