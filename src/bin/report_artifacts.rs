//! Artifact report binary.
//!
//! Opens an artifact directory on the local filesystem, loads every artifact
//! the manifest declares (or only those named with `--artifact`) and prints
//! one line per artifact.
//!
//! Usage (common options):
//! ```bash
//! cargo run --release --bin report-artifacts -- \
//!   --dir ./index --artifact chunk_meta --artifact token_postings --max-bytes 268435456
//! ```
//!
//! Exits with status 1 when any artifact fails to load.

use artifact_io::{
    load_chunk_meta, load_chunk_meta_cold, load_dense_vectors, load_file_meta,
    load_minhash_signatures, load_token_postings, ArtifactError, ArtifactLoader, LoadOptions,
    PieceFormat, SourceFormat, DENSE_VECTOR_ARTIFACTS,
};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct Config {
    dir: PathBuf,
    prefix: String,
    artifacts: Vec<String>,
    max_bytes: Option<u64>,
    strict: bool,
    include_cold: bool,
}

impl Config {
    fn from_args() -> Result<Self, String> {
        let mut dir: Option<PathBuf> = None;
        let mut prefix = String::new();
        let mut artifacts = Vec::new();
        let mut max_bytes: Option<u64> = None;
        let mut strict = true;
        let mut include_cold = false;

        let args: Vec<String> = std::env::args().collect();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--dir" => {
                    i += 1;
                    dir = args.get(i).map(PathBuf::from);
                }
                "--prefix" => {
                    i += 1;
                    prefix = args.get(i).cloned().unwrap_or_default();
                }
                "--artifact" => {
                    i += 1;
                    let name = args.get(i).ok_or("--artifact needs a name")?;
                    artifacts.push(name.clone());
                }
                "--max-bytes" => {
                    i += 1;
                    let raw = args.get(i).ok_or("--max-bytes needs a value")?;
                    max_bytes = Some(
                        raw.replace('_', "")
                            .parse()
                            .map_err(|_| format!("invalid --max-bytes {}", raw))?,
                    );
                }
                "--non-strict" => strict = false,
                "--include-cold" => include_cold = true,
                flag => {
                    return Err(format!("Unknown flag: {}", flag));
                }
            }
            i += 1;
        }

        let dir = dir.ok_or("--dir is required")?;
        if !dir.is_dir() {
            return Err(format!("--dir {} is not a directory", dir.display()));
        }
        Ok(Self {
            dir,
            prefix,
            artifacts,
            max_bytes,
            strict,
            include_cold,
        })
    }

    fn load_options(&self) -> LoadOptions {
        let mut options = LoadOptions::default()
            .with_strict(self.strict)
            .with_include_cold(self.include_cold);
        if let Some(max_bytes) = self.max_bytes {
            options = options.with_max_bytes(max_bytes);
        }
        options
    }
}

/// Load `name` and return its row count.
async fn count_rows(loader: &ArtifactLoader, name: &str) -> Result<usize, ArtifactError> {
    match name {
        "chunk_meta" => return Ok(load_chunk_meta(loader).await?.len()),
        "chunk_meta_cold" => return Ok(load_chunk_meta_cold(loader).await?.len()),
        "file_meta" => return Ok(load_file_meta(loader).await?.len()),
        "token_postings" => return Ok(load_token_postings(loader).await?.vocab.len()),
        "minhash_signatures" => return Ok(load_minhash_signatures(loader).await?.count),
        _ if DENSE_VECTOR_ARTIFACTS.contains(&name) => {
            return Ok(load_dense_vectors(loader, name).await?.count)
        }
        _ => {}
    }

    let sources = loader.resolve(name).await?;
    match sources.format {
        SourceFormat::Piece(PieceFormat::Varint) => Ok(loader.load_varint_list(name).await?.len()),
        SourceFormat::Piece(PieceFormat::Json) if !sources.merged => {
            Ok(match loader.load_object::<Value>(name).await? {
                Value::Array(rows) => rows.len(),
                Value::Object(obj) => obj
                    .get("rows")
                    .and_then(Value::as_array)
                    .map_or(1, Vec::len),
                _ => 1,
            })
        }
        SourceFormat::Piece(PieceFormat::Binary | PieceFormat::Packed | PieceFormat::Dir) => {
            // resolution checked the files exist; opaque payloads report the
            // declared count, if any
            Ok(sources
                .paths
                .first()
                .and_then(|rel| loader.manifest().piece_by_path(rel))
                .and_then(|piece| piece.count.as_ref())
                .and_then(|count| count.as_u64())
                .map_or(0, |count| count as usize))
        }
        _ => Ok(loader.load_values(name).await?.len()),
    }
}

async fn format_of(loader: &ArtifactLoader, name: &str) -> String {
    match loader.resolve(name).await {
        Ok(sources) => sources.format.as_str().to_string(),
        Err(_) => "-".to_string(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::from_args() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid arguments: {}", e);
            return ExitCode::from(2);
        }
    };

    let store = match artifact_io::local(&config.dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            let e = ArtifactError::from(e);
            println!("error {} {} {}", config.dir.display(), e.code(), e);
            return ExitCode::FAILURE;
        }
    };
    let loader =
        match ArtifactLoader::open(store, config.prefix.clone(), config.load_options()).await {
            Ok(loader) => loader,
            Err(e) => {
                println!("error {} {} {}", config.dir.display(), e.code(), e);
                return ExitCode::FAILURE;
            }
        };
    tracing::info!(
        dir = %config.dir.display(),
        compatibility_key = ?loader.manifest().compatibility_key,
        pieces = loader.manifest().pieces.len(),
        "opened artifact directory"
    );

    let names = if config.artifacts.is_empty() {
        loader.manifest().artifact_names()
    } else {
        config.artifacts.clone()
    };

    let mut failed = 0usize;
    for name in &names {
        match count_rows(&loader, name).await {
            Ok(rows) => {
                println!("ok {} {} rows={}", name, format_of(&loader, name).await, rows);
            }
            Err(e) => {
                failed += 1;
                println!("error {} {} {}", name, e.code(), e);
            }
        }
    }

    if failed > 0 {
        tracing::warn!(failed, total = names.len(), "artifact report found failures");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
