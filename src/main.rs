use std::path::PathBuf;

use enhance_backend_core::api::server::serve;
use enhance_backend_core::settings::profiles::ProfileSet;
use enhance_backend_core::settings::ServiceSettings;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    match cli_args.first().map(String::as_str) {
        Some("check-backends") => {
            run_check_backends_cli(cli_args.into_iter().skip(1).collect::<Vec<_>>())?;
            return Ok(());
        }
        Some("-h" | "--help") => {
            print_usage();
            return Ok(());
        }
        Some(unknown) => {
            return Err(std::io::Error::other(format!(
                "Unknown command: {unknown}\n\nUse --help for usage."
            ))
            .into());
        }
        None => {}
    }

    let settings = ServiceSettings::from_env()?;
    serve(settings).await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct CheckBackendsCliArgs {
    file: Option<PathBuf>,
    help: bool,
}

fn parse_check_backends_cli_args(
    args: &[String],
) -> Result<CheckBackendsCliArgs, Box<dyn std::error::Error>> {
    let mut parsed = CheckBackendsCliArgs::default();
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, Box<dyn std::error::Error>> {
            let Some(value) = args.get(idx + 1).filter(|v| !v.trim().is_empty()) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--file" => {
                parsed.file = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            "-h" | "--help" => {
                parsed.help = true;
                i += 1;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }
    Ok(parsed)
}

fn run_check_backends_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = parse_check_backends_cli_args(args.as_slice())?;
    if parsed.help {
        print_check_backends_usage();
        return Ok(());
    }

    let profiles = match parsed.file {
        Some(path) => ProfileSet::load(path.as_path())?,
        None => ServiceSettings::from_env()?.load_profiles()?,
    };
    println!("{}", serde_json::to_string_pretty(&profiles)?);
    Ok(())
}

fn print_usage() {
    println!(
        "Usage: enhance-backend-core [check-backends [--file PATH]]\n\n\
         Without a command the HTTP service starts. Configuration is read from\n\
         ENHANCE_* environment variables; see ENHANCE_BACKENDS_FILE for profiles."
    );
}

fn print_check_backends_usage() {
    println!(
        "Usage: enhance-backend-core check-backends [--file PATH]\n\n\
         Loads and validates backend profiles, then prints them as JSON.\n\
         Without --file the profiles the service would use are checked."
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_check_backends_accepts_file_flag() {
        let parsed = parse_check_backends_cli_args(&[
            String::from("--file"),
            String::from("config/backends.toml"),
        ])
        .expect("parse should succeed");
        assert_eq!(parsed.file, Some(PathBuf::from("config/backends.toml")));
        assert!(!parsed.help);
    }

    #[test]
    fn parse_check_backends_requires_file_value() {
        let err = parse_check_backends_cli_args(&[String::from("--file")])
            .expect_err("value should be required");
        assert!(err.to_string().contains("--file"));
    }

    #[test]
    fn parse_check_backends_rejects_unknown_flags() {
        let err = parse_check_backends_cli_args(&[String::from("--verbose")])
            .expect_err("unknown flag");
        assert!(err.to_string().contains("Unknown argument: --verbose"));
    }

    #[test]
    fn shipped_backends_file_validates() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/backends.toml");
        let set = ProfileSet::load(path.as_path()).expect("shipped profiles should validate");
        assert_eq!(set.default_profile, "tile-upscaler");
        assert!(set.profiles.len() >= 3);
    }
}
