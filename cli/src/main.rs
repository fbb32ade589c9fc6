#[macro_use] extern crate clap;

use clap::{App, ArgMatches};
use env_logger::{from_env, Env};
use rootbox::{
    errors::RuntimeError,
    image::{ImageSource, Preparer},
    ExitStatus, Sandbox,
};
use std::{future, path::Path, time::Duration};
use tokio::{
    signal::unix::{signal, SignalKind},
    time,
};

#[tokio::main]
async fn main() {
    let yaml = load_yaml!("cli.yml");
    let matches = App::from_yaml(yaml).version(crate_version!()).get_matches();

    let log_level = matches.value_of("log_level").unwrap();
    from_env(Env::default().default_filter_or(log_level)).init();

    let timeout = if matches.is_present("timeout") {
        Some(Duration::from_secs(
            value_t!(matches, "timeout", u64).unwrap_or_else(|e| e.exit()),
        ))
    } else {
        None
    };

    match run(&matches, timeout).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            log::error!("{}", err);
            std::process::exit(0xFF);
        }
    }
}

async fn run(matches: &ArgMatches<'_>, timeout: Option<Duration>) -> Result<i32, RuntimeError> {
    let mut preparer = Preparer::builder().cleanup_on_failure(matches.is_present("cleanup"));
    if let Some(dir) = matches.value_of("download_dir") {
        preparer = preparer.download_dir(Path::new(dir));
    }
    let source = ImageSource::new(
        matches.value_of("image_location").unwrap(),
        matches.value_of("root").unwrap_or(""),
    );
    let root = preparer.build()?.prepare(&source).await?;

    if matches.is_present("prepare") {
        if matches.is_present("command") {
            log::warn!("prepare-only mode, command is being ignored")
        }
        println!("{}", root.display());
        return Ok(0);
    }

    let sandbox = Sandbox::new(root);
    sandbox.start(
        matches.value_of("command").unwrap(),
        string_values(matches, "run_args"),
    )?;
    let status = supervise(&sandbox, timeout).await?;
    sandbox.drain_output().await?;
    log::info!("{:?} finished with {}", sandbox, status);
    Ok(status.exit_code())
}

/// Wait for the sandbox, passing along SIGINT and SIGTERM and enforcing the
/// timeout with SIGKILL
async fn supervise(
    sandbox: &Sandbox,
    timeout: Option<Duration>,
) -> Result<ExitStatus, RuntimeError> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let deadline = async {
        match timeout {
            Some(timeout) => time::sleep(timeout).await,
            None => future::pending().await,
        }
    };
    let wait = sandbox.wait();
    tokio::pin!(deadline);
    tokio::pin!(wait);

    let mut timed_out = false;
    loop {
        tokio::select! {
            status = &mut wait => return status,
            _ = interrupt.recv() => forward(sandbox, libc::SIGINT),
            _ = terminate.recv() => forward(sandbox, libc::SIGTERM),
            _ = &mut deadline, if !timed_out => {
                log::warn!("timed out, killing {:?}", sandbox);
                timed_out = true;
                forward(sandbox, libc::SIGKILL);
            }
        }
    }
}

fn forward(sandbox: &Sandbox, signal: libc::c_int) {
    if let Err(err) = sandbox.send_signal(signal) {
        log::warn!("unable to forward signal {}, {}", signal, err);
    }
}

fn string_values<S: AsRef<str>>(matches: &ArgMatches, name: S) -> Vec<String> {
    matches
        .values_of(name)
        .into_iter()
        .map(|values| values.map(|value| value.to_string()))
        .flatten()
        .collect()
}
