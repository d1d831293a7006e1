//! Domain API sample runner.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: service root, user and application from
//!    arguments or `DOMAINAPI_*` environment variables; the password is
//!    prompted without echo when not supplied.
//! 2. **Wire observability**: `tracing-subscriber` on stderr, plus an
//!    OpenTelemetry OTLP exporter when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! 3. **Construct infrastructure**: one [`HttpTransport`] shared by every
//!    session the runner opens.
//! 4. **Run samples**: either the one named on the command line, or an
//!    interactive menu until `exit`. Each run logs in with a fresh session,
//!    enables `skipnulls`, runs the sample and closes the session.

mod samples;
mod telemetry;

use std::io::{self, BufRead, Write};

use anyhow::Context;
use clap::Parser;
use domain::{ClientError, DomainApiError};
use session::{Credentials, Session};
use tracing::info;
use transport::{HttpTransport, HttpTransportConfig};

use crate::samples::{Sample, SAMPLES};

#[derive(Debug, Parser)]
#[command(
    name = "domainapi-samples",
    version,
    about = "Runs domain API client samples against a live service"
)]
struct Args {
    /// Query service root, e.g. https://mycompany.com/api/domain/odata/
    #[arg(long, env = "DOMAINAPI_SERVICE_ROOT")]
    service_root: Option<String>,

    #[arg(long, short, env = "DOMAINAPI_USER")]
    user: Option<String>,

    #[arg(long, env = "DOMAINAPI_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Application name sent with the login.
    #[arg(long, env = "DOMAINAPI_APP", default_value = "Samples")]
    app: String,

    #[arg(long, env = "DOMAINAPI_LANGUAGE", default_value = "en")]
    language: String,

    /// Validate the server's TLS certificate.
    #[arg(long)]
    verify_tls: bool,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,

    /// List the samples and exit.
    #[arg(long)]
    list: bool,

    /// Sample name or menu number. Omit for the interactive menu.
    sample: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _telemetry = telemetry::init(args.json_logs)?;

    if args.list {
        print_menu();
        return Ok(());
    }

    let service_root = match args.service_root {
        Some(root) => root,
        None => {
            println!("For example: https://mycompany.com/api/domain/odata/");
            prompt("Service root: ")?
        }
    };
    let user = match args.user {
        Some(user) => user,
        None => prompt("User name: ")?,
    };
    let password = match args.password {
        Some(password) => password,
        None => rpassword::prompt_password("Password: ").context("failed to read password")?,
    };
    let credentials = Credentials::new(args.app, user, password, args.language);

    let config = HttpTransportConfig {
        accept_invalid_certs: !args.verify_tls,
        timeout_secs: args.timeout_secs,
        ..HttpTransportConfig::default()
    };
    let transport = HttpTransport::new(&service_root, &config)?;
    info!(service_root = %transport.service_root(), "Sample runner started");

    if let Some(selector) = args.sample {
        let sample = samples::find(&selector)
            .with_context(|| format!("sample '{selector}' not found"))?;
        return match run(&transport, &credentials, sample).await {
            Ok(()) => Ok(()),
            Err(error) => {
                report(&error);
                Err(anyhow::anyhow!("{} failed", sample.name))
            }
        };
    }

    loop {
        println!();
        println!("Type a sample number or name and hit Enter to run it. Type 'exit' to quit.");
        print_menu();

        let line = prompt("> ")?;
        if line.eq_ignore_ascii_case("exit") {
            return Ok(());
        }
        match samples::find(&line) {
            Some(sample) => {
                if let Err(error) = run(&transport, &credentials, sample).await {
                    report(&error);
                }
            }
            None => println!("Sample '{line}' not found."),
        }
    }
}

fn print_menu() {
    for (number, sample) in SAMPLES.iter().enumerate() {
        println!("{}: {:<24}{}", number + 1, sample.name, sample.summary);
    }
}

fn prompt(label: &str) -> anyhow::Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        anyhow::bail!("unexpected end of input");
    }
    Ok(line.trim().to_owned())
}

/// Logs in with a fresh session, runs `sample`, and closes the session
/// whatever the outcome.
async fn run(
    transport: &HttpTransport,
    credentials: &Credentials,
    sample: &Sample,
) -> anyhow::Result<()> {
    let session = Session::with_transport(transport.clone());
    println!("Logging in...");
    session.login(credentials).await?;
    session.update_request_options(|options| options.set_skip_nulls(true));

    println!("Executing {}...", sample.name);
    let outcome = (sample.run)(&session).await;
    session.close().await;
    outcome?;
    println!("{} done.", sample.name);
    Ok(())
}

/// Prints a failure the way an operator needs it: each aggregated failure on
/// its own line, and the service's own message where there is one.
fn report(error: &anyhow::Error) {
    println!("ERROR");
    if let Some(source) = error.downcast_ref::<ClientError>() {
        report_client_error(source);
        return;
    }
    match error.downcast_ref::<DomainApiError>() {
        Some(DomainApiError::Aggregate { operation, failures }) => {
            println!("{operation} failed:");
            for failure in failures {
                println!("  {failure}");
            }
        }
        Some(DomainApiError::Batch { source, .. }) => {
            println!("{error}");
            report_client_error(source);
        }
        Some(DomainApiError::Transaction {
            message,
            source: Some(source),
        }) => {
            println!("{message}");
            report_client_error(source);
        }
        Some(DomainApiError::Authentication {
            message,
            body: Some(body),
        }) => {
            println!("{message}");
            println!("{body}");
        }
        Some(DomainApiError::Client(source)) => report_client_error(source),
        _ => println!("{error:#}"),
    }
}

fn report_client_error(error: &ClientError) {
    match error {
        ClientError::Batch { failures } => {
            for failure in failures {
                println!("  {failure}");
            }
        }
        ClientError::Status {
            status,
            message,
            error: Some(server),
            ..
        } => {
            println!("Request failed with status {status}");
            println!("{message}");
            for detail in &server.details {
                println!("  {detail}");
            }
        }
        ClientError::Status { status, body, .. } => {
            println!("Request failed with status {status}");
            println!("{body}");
        }
        other => println!("{other}"),
    }
}
