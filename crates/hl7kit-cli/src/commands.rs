//! Command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hl7kit_core::config::{ConfigLoader, Hl7kitConfig, LoadedConfig};
use hl7kit_core::discovery::expand_paths;
use futures::{SinkExt, StreamExt};
use hl7kit_core::mllp::{self, payload_text};
use hl7kit_core::parser::is_xml;
use hl7kit_core::{
    AckCode, DefinitionRegistry, ExecutionSummary, Hl7Error, Message, PipeParser, Result,
    Severity, Terser, ValidationExecutor, Validator, XmlParser, generate_ack,
    generate_ack_for_report,
};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::output::{OutputFormatter, er7_for_terminal, print_tree};
use crate::{ConfigFormat, Encoding, OutputFormat, ParseFormat, SeverityFilter};

/// Parsers and validator built from the active configuration
struct Toolkit {
    loaded: LoadedConfig,
    registry: Arc<DefinitionRegistry>,
    pipe: PipeParser,
    xml: XmlParser,
}

impl Toolkit {
    fn load(config_path: Option<&Path>) -> Result<Self> {
        let loaded = ConfigLoader::load(config_path, None)?;
        match &loaded.path {
            Some(path) => debug!("Using config {}", path.display()),
            None => debug!("Using default configuration"),
        }
        let registry = loaded.registry()?;
        let options = loaded.config.parser_options();
        Ok(Self {
            pipe: PipeParser::new(registry.clone(), options.clone()),
            xml: XmlParser::new(registry.clone(), options),
            registry,
            loaded,
        })
    }

    fn config(&self) -> &Hl7kitConfig {
        &self.loaded.config
    }

    fn validator(&self, strict: bool) -> Validator {
        let mut options = self.config().validation_options();
        options.strict |= strict;
        Validator::new(self.registry.clone(), options)
    }

    fn parse(&self, text: &str) -> Result<Message> {
        if is_xml(text) {
            self.xml.parse(text)
        } else {
            self.pipe.parse(text)
        }
    }

    async fn parse_file(&self, file: &Path) -> Result<Message> {
        let text = read_input(file).await?;
        self.parse(&text)
    }
}

/// Read a message file, or stdin for `-`
async fn read_input(file: &Path) -> Result<String> {
    let bytes = if file == Path::new("-") {
        let mut buffer = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| Hl7Error::io_error("<stdin>", e))?;
        buffer
    } else {
        tokio::fs::read(file)
            .await
            .map_err(|e| Hl7Error::io_error(file, e))?
    };
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_output(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text).map_err(|e| Hl7Error::io_error(path, e))?;
            info!("Wrote {}", path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}

pub async fn parse_command(
    file: PathBuf,
    format: ParseFormat,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let toolkit = Toolkit::load(config_path.as_deref())?;
    let message = toolkit.parse_file(&file).await?;

    match format {
        ParseFormat::Tree => print_tree(&message),
        ParseFormat::Json => {
            let json = serde_json::to_string_pretty(&message)
                .map_err(|e| Hl7Error::serialization_error(e.to_string()))?;
            println!("{json}");
        }
        ParseFormat::Yaml => {
            let yaml = serde_yaml::to_string(&message)
                .map_err(|e| Hl7Error::serialization_error(e.to_string()))?;
            print!("{yaml}");
        }
    }
    Ok(())
}

pub async fn encode_command(
    file: PathBuf,
    to: Encoding,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let toolkit = Toolkit::load(config_path.as_deref())?;
    let message = toolkit.parse_file(&file).await?;

    let encoded = match to {
        Encoding::Er7 => {
            let encoded = toolkit.pipe.encode(&message);
            if output.is_some() {
                encoded
            } else {
                er7_for_terminal(&encoded)
            }
        }
        Encoding::Xml => {
            let mut xml = toolkit.xml.encode(&message)?;
            xml.push('\n');
            xml
        }
    };
    write_output(output.as_deref(), &encoded)
}

pub async fn validate_command(
    paths: Vec<PathBuf>,
    format: OutputFormat,
    strict: bool,
    min_severity: SeverityFilter,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let toolkit = Toolkit::load(config_path.as_deref())?;
    if !toolkit.config().validation_enabled() {
        warn!("Validation is disabled in the configuration");
        println!("Validation is disabled (validation.enabled = false)");
        return Ok(());
    }

    let files = expand_paths(&paths, toolkit.config())?;
    info!("Validating {} file(s)", files.len());

    let executor = ValidationExecutor::new(toolkit.pipe.clone(), toolkit.validator(strict));
    let mut reports = tokio::task::spawn_blocking(move || executor.validate_files(&files))
        .await
        .map_err(|e| Hl7Error::internal_error(format!("Validation task failed: {e}")))?;

    let summary = ExecutionSummary::from_reports(&reports);
    let min = match min_severity {
        SeverityFilter::Error => Severity::Error,
        SeverityFilter::Warning => Severity::Warning,
        SeverityFilter::Info => Severity::Info,
    };
    for report in &mut reports {
        for message in &mut report.messages {
            message.retain_at_least(min);
        }
    }

    OutputFormatter::new(format).print_results(&reports, &summary)?;

    if summary.errors > 0 {
        return Err(Hl7Error::ValidationFailed {
            errors: summary.errors,
        });
    }
    Ok(())
}

pub async fn get_command(file: PathBuf, path: String, config_path: Option<PathBuf>) -> Result<()> {
    let toolkit = Toolkit::load(config_path.as_deref())?;
    let message = toolkit.parse_file(&file).await?;

    match Terser::new(&message).get(&path)? {
        Some(value) => println!("{value}"),
        None => debug!("No value at {}", path),
    }
    Ok(())
}

pub async fn ack_command(
    file: PathBuf,
    code: Option<String>,
    text: Option<String>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let toolkit = Toolkit::load(config_path.as_deref())?;
    let message = toolkit.parse_file(&file).await?;

    let ack = match code {
        Some(code) => generate_ack(&message, code.parse::<AckCode>()?, text.as_deref())?,
        None => {
            let report = toolkit.validator(false).validate(&message);
            generate_ack_for_report(&message, &report)?
        }
    };
    print!("{}", er7_for_terminal(&toolkit.pipe.encode(&ack)));
    Ok(())
}

pub fn describe_command(
    segment: Option<String>,
    field: Option<usize>,
    component: Option<usize>,
    structure: Option<String>,
    table: Option<u16>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let loaded = ConfigLoader::load(config_path.as_deref(), None)?;
    let registry = loaded.registry()?;

    let description = if let Some(structure) = structure {
        let id = structure.to_ascii_uppercase();
        registry
            .describe_structure(&id)
            .ok_or_else(|| Hl7Error::unknown_structure(id))?
    } else if let Some(table) = table {
        registry
            .describe_table(table)
            .ok_or_else(|| Hl7Error::definition_error(format!("Unknown table {table:04}")))?
    } else {
        let segment = segment
            .map(|s| s.to_ascii_uppercase())
            .ok_or_else(|| Hl7Error::config_error("A segment, --structure or --table is required"))?;
        let found = match (field, component) {
            (Some(field), Some(component)) => registry
                .describe_component(&segment, field, component)
                .map(|d| format!("{segment}-{field}.{component} {d}")),
            (Some(field), None) => registry
                .describe_field(&segment, field)
                .map(|d| format!("{segment}-{field} {d}")),
            _ => registry.describe_segment(&segment),
        };
        found.ok_or_else(|| {
            Hl7Error::definition_error(format!(
                "No definition for {}",
                [
                    Some(segment.clone()),
                    field.map(|f| f.to_string()),
                    component.map(|c| c.to_string())
                ]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join("-")
            ))
        })?
    };
    println!("{description}");
    Ok(())
}

pub async fn listen_command(bind: String, once: bool, config_path: Option<PathBuf>) -> Result<()> {
    let toolkit = Arc::new(Toolkit::load(config_path.as_deref())?);
    let listener = TcpListener::bind(&bind)
        .await
        .map_err(|e| Hl7Error::io_error(bind.as_str(), e))?;
    let local = listener
        .local_addr()
        .map_err(|e| Hl7Error::io_error(bind.as_str(), e))?;
    println!("Listening for MLLP connections on {local}");

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| Hl7Error::io_error(bind.as_str(), e))?;
        info!("Connection from {}", peer);
        let toolkit = Arc::clone(&toolkit);
        let handle = tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, &toolkit).await {
                warn!("Connection from {} ended with error: {}", peer, e);
            }
        });
        if once {
            handle
                .await
                .map_err(|e| Hl7Error::internal_error(format!("Connection task failed: {e}")))?;
            return Ok(());
        }
    }
}

async fn serve_connection(stream: TcpStream, toolkit: &Toolkit) -> Result<()> {
    let validator = toolkit.validator(false);
    let mut transport = mllp::framed(stream);
    while let Some(payload) = transport.next().await {
        let text = payload_text(&payload?);
        let message = match toolkit.pipe.parse(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping unparsable message: {}", e);
                continue;
            }
        };
        let report = validator.validate(&message);
        info!(
            "Received {} {} with {} error(s)",
            message.structure,
            message.control_id().unwrap_or("-"),
            report.error_count()
        );
        let ack = generate_ack_for_report(&message, &report)?;
        transport.send(toolkit.pipe.encode(&ack)).await?;
    }
    Ok(())
}

pub fn config_init_command(format: ConfigFormat, force: bool) -> Result<()> {
    let filename = match format {
        ConfigFormat::Json => ".hl7kitrc.json",
        ConfigFormat::Toml => ".hl7kitrc.toml",
        ConfigFormat::Yaml => "hl7kit.yaml",
    };
    let config_path = PathBuf::from(filename);

    if config_path.exists() && !force {
        return Err(Hl7Error::config_error(format!(
            "Configuration file '{filename}' already exists. Use --force to overwrite."
        )));
    }

    let content = ConfigLoader::render(&Hl7kitConfig::example(), &config_path)?;
    std::fs::write(&config_path, content).map_err(|e| Hl7Error::io_error(&config_path, e))?;

    println!("Created configuration file: {filename}");
    Ok(())
}

pub fn config_validate_command(path: Option<PathBuf>) -> Result<()> {
    debug!("Validating configuration file: {:?}", path);
    let loaded = ConfigLoader::load(path.as_deref(), None)?;
    let Some(source) = &loaded.path else {
        println!("No configuration file found, defaults are in effect");
        return Ok(());
    };

    let problems = loaded.config.problems();
    // Definition files are loaded here so broken paths surface now
    let registry = loaded.registry()?;

    if problems.is_empty() {
        println!("Configuration is valid: {}", source.display());
        println!(
            "  Definitions: HL7 v{} ({} segments)",
            registry.version,
            registry.segments.len()
        );
        Ok(())
    } else {
        for problem in &problems {
            eprintln!("  {problem}");
        }
        Err(Hl7Error::config_error(format!(
            "{} problem(s) in {}",
            problems.len(),
            source.display()
        )))
    }
}

pub fn config_show_command(config_path: Option<PathBuf>) -> Result<()> {
    let loaded = ConfigLoader::load(config_path.as_deref(), None)?;
    match &loaded.path {
        Some(path) => println!("# {}", path.display()),
        None => println!("# defaults (no configuration file found)"),
    }
    let rendered = ConfigLoader::render(&loaded.config, Path::new("config.json"))?;
    println!("{rendered}");
    Ok(())
}

pub fn config_schema_command() -> Result<()> {
    println!("{}", ConfigLoader::json_schema()?);
    Ok(())
}
