/// Estimates how many model tokens a piece of text occupies.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}
