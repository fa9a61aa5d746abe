use crc32fast::Hasher;

pub const DEFAULT_TEMP_PREFIX: &str = "temp-";

/// Short client seed derived from an arbitrary client name using CRC32
pub fn client_seed(client: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(client.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// True for ids minted on the client under `prefix` that the store hasn't
/// confirmed yet. An empty prefix matches nothing.
pub fn is_temporary_id(id: &str, prefix: &str) -> bool {
    !prefix.is_empty() && id.starts_with(prefix)
}

/// Sequential generator for temporary (client-only) entity ids
#[derive(Debug, Clone)]
pub struct TempIdGenerator {
    prefix: String,
    seed: String, // Client seed (CRC32)
    count: u32,   // Sequential counter
}

impl TempIdGenerator {
    pub fn new(client: &str) -> Self {
        Self::with_prefix(DEFAULT_TEMP_PREFIX, client)
    }

    pub fn with_prefix(prefix: &str, client: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            seed: client_seed(client),
            count: 0,
        }
    }

    /// Generate next temporary id
    pub fn next_id(&mut self) -> String {
        self.count += 1;
        format!("{}{}-{}", self.prefix, self.seed, self.count)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether `id` was minted with this generator's prefix
    pub fn is_temporary(&self, id: &str) -> bool {
        is_temporary_id(id, &self.prefix)
    }
}
