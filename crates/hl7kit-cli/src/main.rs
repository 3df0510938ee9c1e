//! hl7kit CLI
//!
//! Command-line interface for parsing, converting and validating HL7 v2
//! messages

mod commands;
mod output;

use std::io;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use hl7kit_core::{Hl7Error, Result, init_tracing_with};
use tracing::error;

#[derive(Parser)]
#[command(name = "hl7kit")]
#[command(about = "hl7kit: parse, convert and validate HL7 v2 messages")]
#[command(version = hl7kit_core::VERSION)]
#[command(
    long_about = "hl7kit reads HL7 v2 messages in ER7 (pipe) or XML encoding, checks them\n\
against the HL7 v2.5 message definitions and writes acknowledgments.\n\
\n\
Examples:\n  \
hl7kit parse adt.hl7                 # Show the message tree\n  \
hl7kit validate inbound/             # Validate every message file\n  \
hl7kit get adt.hl7 PID-5-1           # Read a single value\n  \
hl7kit encode adt.hl7 --to xml       # Convert to v2.xml\n  \
hl7kit ack adt.hl7 --code AE         # Build an acknowledgment\n  \
hl7kit describe PID 5                # Look up a field definition"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(
        short,
        long,
        global = true,
        help = "Path to configuration file (.hl7kitrc.json/.hl7kitrc.toml/hl7kit.yaml)"
    )]
    config: Option<PathBuf>,

    /// Verbose output (can be used multiple times for increased verbosity)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Number of threads to use for parallel validation
    #[arg(
        short = 'j',
        long,
        global = true,
        help = "Number of threads (default: number of CPU cores)"
    )]
    threads: Option<usize>,

    /// Generate shell completion script
    #[arg(
        long,
        value_enum,
        help = "Generate completion script for specified shell"
    )]
    generate_completion: Option<Shell>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a message and print its structure
    Parse {
        #[arg(help = "Message file (ER7 or XML); '-' reads stdin")]
        file: PathBuf,

        #[arg(short, long, default_value = "tree", help = "Output format")]
        format: ParseFormat,
    },

    /// Re-encode a message as normalized ER7 or as XML
    #[command(alias = "convert")]
    Encode {
        #[arg(help = "Message file (ER7 or XML); '-' reads stdin")]
        file: PathBuf,

        #[arg(long, default_value = "er7", help = "Target encoding")]
        to: Encoding,

        #[arg(short, long, help = "Write to this file instead of stdout")]
        output: Option<PathBuf>,
    },

    /// Validate message files against the message definitions
    #[command(alias = "check")]
    Validate {
        #[arg(help = "Files or directories to validate (default: current directory)")]
        paths: Vec<PathBuf>,

        #[arg(
            short,
            long,
            default_value = "human",
            help = "Output format for diagnostics"
        )]
        format: OutputFormat,

        #[arg(long, help = "Treat warnings as errors")]
        strict: bool,

        #[arg(
            long,
            default_value = "info",
            help = "Minimum severity level to report"
        )]
        min_severity: SeverityFilter,
    },

    /// Read one value with a terser path such as PID-5-1 or /PATIENT/PID-3(1)-1
    Get {
        #[arg(help = "Message file (ER7 or XML); '-' reads stdin")]
        file: PathBuf,

        #[arg(help = "Terser path")]
        path: String,
    },

    /// Build an acknowledgment for a message
    Ack {
        #[arg(help = "Message file (ER7 or XML); '-' reads stdin")]
        file: PathBuf,

        #[arg(long, help = "Acknowledgment code (AA, AE, AR, CA, CE, CR); default: from validation")]
        code: Option<String>,

        #[arg(long, help = "Text for MSA-3 and ERR-8")]
        text: Option<String>,
    },

    /// Look up segment, field, component, structure or table definitions
    Describe {
        #[arg(help = "Segment id such as PID", required_unless_present_any = ["structure", "table"])]
        segment: Option<String>,

        #[arg(help = "Field number")]
        field: Option<usize>,

        #[arg(help = "Component number")]
        component: Option<usize>,

        #[arg(long, help = "Describe a message structure such as ADT_A01")]
        structure: Option<String>,

        #[arg(long, help = "Describe an HL7 table such as 1 or 0001")]
        table: Option<u16>,
    },

    /// Receive messages over MLLP and answer each with an acknowledgment
    Listen {
        #[arg(long, default_value = "127.0.0.1:2575", help = "Address to bind")]
        bind: String,

        #[arg(long, help = "Exit after the first connection closes")]
        once: bool,
    },

    /// Configuration file management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show version information
    #[command(alias = "ver")]
    Version {
        #[arg(long, help = "Show detailed version and build information")]
        detailed: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Initialize a new configuration file
    Init {
        #[arg(long, default_value = "json", help = "Configuration file format")]
        format: ConfigFormat,

        #[arg(long, help = "Overwrite existing configuration file")]
        force: bool,
    },

    /// Validate configuration file
    Validate {
        #[arg(help = "Path to configuration file (default: search upward)")]
        path: Option<PathBuf>,
    },

    /// Show current configuration
    Show,

    /// Print the JSON schema of the configuration file
    Schema,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ParseFormat {
    /// Indented group/segment tree
    Tree,
    /// Message model as JSON
    Json,
    /// Message model as YAML
    Yaml,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Encoding {
    /// Pipe-delimited ER7
    Er7,
    /// HL7 v2.xml
    Xml,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Human-readable output with colors
    Human,
    /// JSON format for programmatic consumption
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SeverityFilter {
    /// Only show errors
    Error,
    /// Show warnings and errors
    Warning,
    /// Show everything
    Info,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Toml,
    Yaml,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Some(shell) = cli.generate_completion {
        generate_completion_script(shell);
        return;
    }

    colored::control::set_override(!cli.no_color && std::env::var_os("NO_COLOR").is_none());

    let log_level = match cli.verbose {
        0 => "hl7kit=error",
        1 => "hl7kit=warn",
        2 => "hl7kit=info",
        3 => "hl7kit=debug",
        _ => "hl7kit=trace",
    };
    init_tracing_with(log_level);

    if let Some(threads) = cli.threads
        && let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
    {
        error!("Failed to set thread pool size: {}", e);
        std::process::exit(2);
    }

    if let Err(e) = run_command(cli).await {
        match e {
            Hl7Error::ValidationFailed { .. } => {}
            other => {
                error!("{}", other);
                eprintln!("error: {other}");
            }
        }
        std::process::exit(1);
    }
}

fn generate_completion_script(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

async fn run_command(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Some(Commands::Parse { file, format }) => {
            commands::parse_command(file, format, config_path).await
        }

        Some(Commands::Encode { file, to, output }) => {
            commands::encode_command(file, to, output, config_path).await
        }

        Some(Commands::Validate {
            paths,
            format,
            strict,
            min_severity,
        }) => {
            let paths = if paths.is_empty() {
                vec![PathBuf::from(".")]
            } else {
                paths
            };
            commands::validate_command(paths, format, strict, min_severity, config_path).await
        }

        Some(Commands::Get { file, path }) => {
            commands::get_command(file, path, config_path).await
        }

        Some(Commands::Ack { file, code, text }) => {
            commands::ack_command(file, code, text, config_path).await
        }

        Some(Commands::Describe {
            segment,
            field,
            component,
            structure,
            table,
        }) => commands::describe_command(segment, field, component, structure, table, config_path),

        Some(Commands::Listen { bind, once }) => {
            commands::listen_command(bind, once, config_path).await
        }

        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { format, force } => commands::config_init_command(format, force),
            ConfigAction::Validate { path } => commands::config_validate_command(path),
            ConfigAction::Show => commands::config_show_command(config_path),
            ConfigAction::Schema => commands::config_schema_command(),
        },

        Some(Commands::Version { detailed }) => {
            if detailed {
                println!("hl7kit {}", hl7kit_core::VERSION);
                println!("Build information:");
                println!("  Target: {}", std::env::consts::ARCH);
                println!("  OS: {}", std::env::consts::OS);
                match hl7kit_core::DefinitionRegistry::builtin() {
                    Ok(registry) => println!(
                        "  Definitions: HL7 v{} ({} segments, {} structures)",
                        registry.version,
                        registry.segments.len(),
                        registry.structures.len()
                    ),
                    Err(e) => println!("  Definitions: unavailable ({e})"),
                }
            } else {
                println!("{}", hl7kit_core::VERSION);
            }
            Ok(())
        }

        None => {
            let mut cmd = Cli::command();
            cmd.print_help()
                .map_err(|e| Hl7Error::io_error("<stdout>", e))?;
            Ok(())
        }
    }
}
