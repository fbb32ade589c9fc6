// Usage: simple <image> <root> <command> [args...]
//
// Prepares the image into the root, then runs the command inside it. Running
// anything needs root privileges.

use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let (image, root, command) = match (args.next(), args.next(), args.next()) {
        (Some(image), Some(root), Some(command)) => (image, root, command),
        _ => {
            eprintln!("usage: simple <image> <root> <command> [args...]");
            std::process::exit(2);
        }
    };

    let sandbox = rootbox::prepare(&image, &root).await?;
    sandbox.start(&command, args)?;
    let status = sandbox.wait().await?;
    sandbox.drain_output().await?;

    println!("{}", status);
    std::process::exit(status.exit_code());
}
