use contigfs::FileSystem;

/// Runs two processes against the default in-memory volume. Set RUST_LOG=debug
/// to see allocator and table traffic.
pub fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let fs = FileSystem::in_memory()?;
    fs.create("file1", 2)?;
    fs.create("file2", 3)?;

    let pid = 0;
    fs.open(pid, "file1")?;
    fs.open(pid, "file2")?;
    fs.write(pid, "file1", b"This is content for file1")?;
    fs.write(pid, "file2", b"This is content for file2 with more data")?;

    let other = fs.register_process();
    fs.open(other, "file2")?;

    for name in &["file1", "file2"] {
        let data = fs.read(pid, name)?;
        let text = String::from_utf8_lossy(&data);
        println!("Reading {}: {}", name, text.trim_end_matches('\0'));
    }

    fs.close(pid, "file1")?;
    fs.close(pid, "file2")?;
    println!(
        "file2 still open by {} process(es), {} blocks free",
        fs.open_count("file2"),
        fs.free_block_count()
    );
    fs.close(other, "file2")?;

    if let Err(e) = fs.create("huge", 600) {
        println!("create huge: {}", e);
    }
    Ok(())
}
