use rand::{distributions::Alphanumeric, thread_rng, Rng};

/// Alphanumeric id material for store-assigned document ids.
pub fn random_string(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
