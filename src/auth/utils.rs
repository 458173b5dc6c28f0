use rand::Rng;

/// Uniformly random 6-digit code, zero padded.
pub fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:06}")
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
