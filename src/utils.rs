#[cfg(feature = "mimalloc")]
mod mimalloc {
    use mimalloc::MiMalloc;

    #[global_allocator]
    static GLOBAL: MiMalloc = MiMalloc;
}

/// Positional arguments with the program name stripped.
pub fn positional_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}
