use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use encodings_core::resolve::request::PARAM_POSTER;
use encodings_core::store::read_records;
use encodings_core::{
    load_encodings_config, write_report, EncodingsConfig, ErrorBody, HttpProbe, ImportOptions,
    ImportSummary, ReplayError, ReplayRunner, ReplaySettings, ReplaySummary, Resolution,
    ResolveError, Resolver, SharedEquivalences, SqliteRecordStore, StoreError,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] encodings_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("resolution error: {0}")]
    Resolve(#[from] ResolveError),
    #[error("replay error: {0}")]
    Replay(#[from] ReplayError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("nenhum alvo de replay definido (use --target ou [replay].target)")]
    MissingTarget,
    #[error("leitura de eventos interrompida: {0}")]
    ReplayReader(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Encoding resolution command-line interface", long_about = None)]
pub struct Cli {
    /// Caminho do encodings.toml principal
    #[arg(long, default_value = "configs/encodings.toml")]
    pub config: PathBuf,
    /// Caminho alternativo para o banco SQLite (substitui store.path)
    #[arg(long)]
    pub store: Option<PathBuf>,
    /// Formato de saída
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Cria o esquema do banco de registros
    Init,
    /// Resolve a melhor codificação para os parâmetros informados
    Resolve(ResolveArgs),
    /// Lista equivalências de formato
    Equivalents(EquivalentsArgs),
    /// Importa registros JSON (um objeto por linha) para uma tabela
    Import(ImportArgs),
    /// Reexecuta eventos capturados contra um servidor alvo
    Replay(ReplayArgs),
    /// Gera script de autocompletar para o shell
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Parâmetros no formato chave=valor (ex.: file=mygreatvideo format=mp4)
    #[arg(required = true)]
    pub params: Vec<String>,
    /// Prazo máximo em milissegundos (padrão: resolver.request_timeout_ms)
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Args, Debug)]
pub struct EquivalentsArgs {
    /// Tipo de mídia a consultar; omitido lista todos os pares
    pub media_type: Option<String>,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Tabela de destino
    #[arg(long)]
    pub table: String,
    /// Arquivo JSON lines de entrada
    #[arg(long)]
    pub input: PathBuf,
    /// Campos de índice onde string vazia vira ABSENT
    #[arg(long, value_delimiter = ',')]
    pub nullable_fields: Vec<String>,
    /// Gera um uid para registros que não possuem
    #[arg(long, default_value_t = false)]
    pub add_uid: bool,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Host alvo (ex.: encodings.staging.example.com)
    #[arg(long)]
    pub target: Option<String>,
    /// Tabela de eventos capturados
    #[arg(long)]
    pub table: Option<String>,
    /// Tamanho de página na leitura dos eventos
    #[arg(long)]
    pub page_size: Option<usize>,
    /// Requisições simultâneas
    #[arg(long)]
    pub parallel: Option<usize>,
    /// Arquivo JSON de relatório
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    pub shell: Shell,
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        write_completions(args.shell, &mut io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Init => {
            let result = context.init().await?;
            render(&result, cli.format)?;
        }
        Commands::Resolve(args) => {
            let output = context.resolve(args).await?;
            render(&output, cli.format)?;
            if let Some(err) = output.error.filter(|err| err.status_code() >= 500) {
                return Err(AppError::Resolve(err));
            }
        }
        Commands::Equivalents(args) => {
            let list = context.equivalents(args).await?;
            render(&list, cli.format)?;
        }
        Commands::Import(args) => {
            let result = context.import(args).await?;
            render(&result, cli.format)?;
        }
        Commands::Replay(args) => {
            let result = context.replay(args).await?;
            render(&result, cli.format)?;
            if let Some(reason) = result.reader_error {
                return Err(AppError::ReplayReader(reason));
            }
        }
        Commands::Completions(_) => {}
    }

    Ok(())
}

pub fn write_completions(shell: Shell, out: &mut dyn Write) {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, name, out);
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: EncodingsConfig,
    store_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = load_encodings_config(&cli.config)?;
        let store_path = cli.store.clone().unwrap_or_else(|| config.store_path());
        Ok(Self { config, store_path })
    }

    fn reader(&self) -> Result<SqliteRecordStore> {
        Ok(SqliteRecordStore::builder()
            .path(&self.store_path)
            .read_only(self.config.store.read_only)
            .page_size(self.config.store.page_size)
            .build()?)
    }

    fn writer(&self) -> Result<SqliteRecordStore> {
        if let Some(parent) = self
            .store_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(SqliteRecordStore::builder()
            .path(&self.store_path)
            .read_only(false)
            .create_if_missing(true)
            .page_size(self.config.store.page_size)
            .build()?)
    }

    async fn init(&self) -> Result<InitResult> {
        let store = self.writer()?;
        tokio::task::spawn_blocking(move || store.initialize()).await??;
        info!(path = %self.store_path.display(), "store schema initialized");
        Ok(InitResult {
            path: self.store_path.clone(),
        })
    }

    async fn resolver(&self) -> Result<Resolver> {
        let resolver = Resolver::new(
            Arc::new(self.reader()?),
            self.config.tables.clone(),
            SharedEquivalences::default(),
            self.config.resolver.clone(),
        );
        resolver.refresh_equivalences().await?;
        Ok(resolver)
    }

    async fn resolve(&self, args: &ResolveArgs) -> Result<ResolveOutput> {
        let params = parse_params(&args.params);
        let resolver = self.resolver().await?;
        let timeout = args
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.resolver.request_timeout());
        let poster_only = params.contains_key(PARAM_POSTER);
        let outcome = resolver
            .resolve_within(&params, &CancellationToken::new(), timeout)
            .await;
        ResolveOutput::from_outcome(outcome, poster_only)
    }

    async fn equivalents(&self, args: &EquivalentsArgs) -> Result<EquivalenceList> {
        let resolver = self.resolver().await?;
        let cache = resolver.equivalences().snapshot();
        let rows = match &args.media_type {
            Some(media_type) => vec![EquivalenceRow {
                label: media_type.clone(),
                equivalents: cache.equivalents_for(media_type),
            }],
            None => cache
                .pairs()
                .into_iter()
                .map(|(real_name, mime)| EquivalenceRow {
                    label: real_name.clone(),
                    equivalents: vec![real_name, mime],
                })
                .collect(),
        };
        Ok(EquivalenceList { rows })
    }

    async fn import(&self, args: &ImportArgs) -> Result<ImportResult> {
        let store = self.writer()?;
        let table = args.table.clone();
        let input = args.input.clone();
        let options = ImportOptions {
            nullable_key_fields: args.nullable_fields.clone(),
            generate_uid: args.add_uid,
            ..ImportOptions::default()
        };
        let summary = tokio::task::spawn_blocking(move || -> Result<ImportSummary> {
            let records = read_records(BufReader::new(File::open(&input)?))?;
            Ok(store.import(&table, &records, &options)?)
        })
        .await??;
        info!(table = %args.table, rows = summary.rows, "import finished");
        Ok(ImportResult {
            table: args.table.clone(),
            summary,
        })
    }

    fn replay_settings(&self, args: &ReplayArgs) -> Result<ReplaySettings> {
        let target = args
            .target
            .clone()
            .or_else(|| self.config.replay.target.clone())
            .filter(|target| !target.trim().is_empty())
            .ok_or(AppError::MissingTarget)?;
        Ok(ReplaySettings {
            table: args
                .table
                .clone()
                .unwrap_or_else(|| self.config.tables.captured_events.clone()),
            target,
            parallel: args.parallel.unwrap_or(self.config.replay.parallel).max(1),
            page_size: args
                .page_size
                .unwrap_or(self.config.replay.page_size)
                .max(1),
        })
    }

    async fn replay(&self, args: &ReplayArgs) -> Result<ReplayResultView> {
        let settings = self.replay_settings(args)?;
        let output = args
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.config.replay.output));
        let probe = HttpProbe::new(self.config.resolver.request_timeout())?;
        let runner = ReplayRunner::new(Arc::new(self.reader()?), Arc::new(probe), settings);

        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, stopping replay");
                    cancel.cancel();
                }
            })
        };
        let report = runner.run(&cancel).await;
        interrupt.abort();
        let report = report?;

        write_report(&output, &report)?;
        Ok(ReplayResultView {
            summary: report.summary,
            report: output,
            finished_at: Utc::now(),
            reader_error: report.reader_error,
        })
    }
}

/// `key=value` pairs; a bare `key` is recorded with an empty value, which is enough for the
/// presence-only flags.
fn parse_params(raw: &[String]) -> HashMap<String, String> {
    raw.iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.trim().to_string(), value.to_string()),
            None => (pair.trim().to_string(), String::new()),
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

#[derive(Debug, Serialize)]
pub struct InitResult {
    pub path: PathBuf,
}

impl DisplayFallback for InitResult {
    fn display(&self) -> String {
        format!("Esquema criado em {}", self.path.display())
    }
}

#[derive(Debug, Serialize)]
pub struct ResolveOutput {
    pub status: u16,
    pub body: Value,
    #[serde(skip)]
    error: Option<ResolveError>,
}

impl ResolveOutput {
    fn from_outcome(
        outcome: std::result::Result<Resolution, ResolveError>,
        poster_only: bool,
    ) -> Result<Self> {
        Ok(match outcome {
            Ok(resolution) => {
                let body = match &resolution {
                    Resolution::Selected(selected) if poster_only => {
                        serde_json::json!({ "poster_url": selected.poster_url })
                    }
                    Resolution::Selected(selected) => serde_json::to_value(selected)?,
                    Resolution::NotFound(reason) => serde_json::to_value(ErrorBody::from(*reason))?,
                };
                Self {
                    status: resolution.status_code(),
                    body,
                    error: None,
                }
            }
            Err(err) => Self {
                status: err.status_code(),
                body: serde_json::to_value(ErrorBody::from(&err))?,
                error: Some(err),
            },
        })
    }
}

impl DisplayFallback for ResolveOutput {
    fn display(&self) -> String {
        let mut lines = vec![format!("Status: {}", self.status)];
        match &self.body {
            Value::Object(fields) if self.status == 200 => {
                for key in ["url", "display_format", "media_type", "bitrate", "width", "height"] {
                    if let Some(value) = fields.get(key) {
                        lines.push(format!("  - {key}: {}", plain(value)));
                    }
                }
                if let Some(poster) = fields.get("poster_url") {
                    lines.push(format!("  - poster_url: {}", plain(poster)));
                }
            }
            Value::Object(fields) => {
                if let Some(detail) = fields.get("detail") {
                    lines.push(format!("  - detalhe: {}", plain(detail)));
                }
            }
            other => lines.push(other.to_string()),
        }
        lines.join("\n")
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Serialize)]
pub struct EquivalenceList {
    pub rows: Vec<EquivalenceRow>,
}

#[derive(Debug, Serialize)]
pub struct EquivalenceRow {
    pub label: String,
    pub equivalents: Vec<String>,
}

impl DisplayFallback for EquivalenceList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "Nenhuma equivalência registrada".to_string();
        }
        self.rows
            .iter()
            .map(|row| format!("{} => {}", row.label, row.equivalents.join(", ")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ImportResult {
    pub table: String,
    pub summary: ImportSummary,
}

impl DisplayFallback for ImportResult {
    fn display(&self) -> String {
        format!(
            "{} registros importados em {} ({} lotes)",
            self.summary.rows, self.table, self.summary.batches
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ReplayResultView {
    pub summary: ReplaySummary,
    pub report: PathBuf,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reader_error: Option<String>,
}

impl DisplayFallback for ReplayResultView {
    fn display(&self) -> String {
        let summary = &self.summary;
        let mut lines = vec![
            format!(
                "{} / {} testes bem-sucedidos",
                summary.passed, summary.total
            ),
            format!("  - falhas: {}", summary.failed),
            format!("  - erros: {}", summary.errored),
            format!("  - ignorados: {}", summary.skipped),
            format!("Relatório: {}", self.report.display()),
            format!("Concluído em {}", self.finished_at.to_rfc3339()),
        ];
        if let Some(reason) = &self.reader_error {
            lines.push(format!("Leitura interrompida: {reason}"));
        }
        lines.join("\n")
    }
}
