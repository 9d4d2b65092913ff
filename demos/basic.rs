//! Walks a target JVM through a few diagnostic commands.
//!
//! Start any Java process, then run `cargo run --example basic -- <pid>`.

use jattach::Client;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args();
    args.next();
    let pid: i32 = args
        .next()
        .ok_or("usage: basic <java-pid>")?
        .parse()?;

    let client = Client::new();

    println!("=== JVM version ===");
    let response = client.jcmd(pid, "VM.version", &[])?;
    println!("Detected JVM type: {}", response.jvm_type);
    println!("Response code: {}", response.code);
    println!("{}", response.output);

    println!("=== Thread dump ===");
    let response = client.thread_dump(pid)?;
    println!("Response code: {}", response.code);
    println!("{}", truncated(&response.output, 500));

    println!("=== System properties ===");
    let response = client.properties(pid)?;
    println!("Response code: {}", response.code);
    println!("{}", truncated(&response.output, 500));

    Ok(())
}

fn truncated(text: &str, max_len: usize) -> &str {
    match text.char_indices().nth(max_len) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
