use anyhow::{Context, Result};
use cult_transfer::cli::{guess_mime_type, Cli, Commands};
use cult_transfer::config::{Config, SessionContext};
use cult_transfer::network::HttpStore;
use cult_transfer::progress::{DownloadBar, UploadBar};
use cult_transfer::socket::{run_sync, SocketConnection, SyncEvent, SyncSession};
use cult_transfer::transfer::{self, PreparedUpload};
use cult_transfer::transport::DownloadRequest;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.load_config()?;
    let session = cli.session()?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Upload {
            ref path,
            ref mime_type,
        } => {
            upload_file(path, mime_type.clone(), &config, session, &cancel, cli.quiet).await?;
        }
        Commands::Download {
            ref file_name,
            ref lobby_id,
            ref media_token,
            ref output,
        } => {
            let request = DownloadRequest {
                file_name: file_name.clone(),
                lobby_id: lobby_id.clone(),
                media_token: media_token.clone(),
            };
            download_file(request, output.clone(), &config, session, &cancel, cli.quiet).await?;
        }
        Commands::Sync { follow, .. } => {
            sync_clock(&config, &session, follow, &cancel).await?;
        }
    }

    Ok(())
}

async fn upload_file(
    path: &Path,
    mime_type: Option<String>,
    config: &Config,
    session: SessionContext,
    cancel: &CancellationToken,
    quiet: bool,
) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| anyhow::anyhow!("Not a file path: {}", path.display()))?;
    let mime_type = mime_type.unwrap_or_else(|| guess_mime_type(path).to_string());

    println!("Upload");
    println!("═══════════════════════════════════════");

    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    println!("File: {} ({} bytes, {})", file_name, data.len(), mime_type);

    let prepared =
        PreparedUpload::prepare(file_name.clone(), mime_type, data, config.transfer.chunk_size)
            .await?;
    println!(
        "✓ Compressed to {} bytes in {} chunks",
        prepared.compressed.len(),
        prepared.descriptor.total_chunks
    );

    let store = HttpStore::new(&config.server.base_url, session)?;
    let bar = UploadBar::new(&file_name, prepared.descriptor.total_chunks, !quiet);
    let result = transfer::upload(&store, &prepared, &config.transfer, cancel, |p| bar.update(&p)).await;

    match result {
        Ok(report) => {
            bar.finish();
            println!();
            println!(
                "✓ Upload complete! {} chunks, {} bytes, {} pass(es)",
                report.total_chunks, report.bytes, report.passes
            );
            println!("Hash: {}", prepared.descriptor.whole_file_hash);
            Ok(())
        }
        Err(e) => {
            bar.abandon("failed");
            Err(e.into())
        }
    }
}

async fn download_file(
    request: DownloadRequest,
    output: Option<PathBuf>,
    config: &Config,
    session: SessionContext,
    cancel: &CancellationToken,
    quiet: bool,
) -> Result<()> {
    println!("Download");
    println!("═══════════════════════════════════════");
    println!("File: {} (lobby {})", request.file_name, request.lobby_id);

    let store = HttpStore::new(&config.server.base_url, session)?;
    let bar = DownloadBar::new(!quiet);
    let file = match transfer::download(&store, &request, cancel, |p| bar.update(&p)).await {
        Ok(file) => {
            bar.finish();
            file
        }
        Err(e) => {
            bar.abandon("failed");
            return Err(e.into());
        }
    };

    let output_path = output.unwrap_or_else(|| PathBuf::from(&file.name));
    tokio::fs::write(&output_path, &file.blob.data)
        .await
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    println!();
    println!("✓ Hash verified: {}", file.hash);
    println!(
        "✓ {} ({:?}, {} bytes) uploaded {} by {}",
        file.blob.mime_type,
        file.kind,
        file.blob.size(),
        file.upload_date,
        file.uploader_id
    );
    println!("File saved to: {}", output_path.display());
    Ok(())
}

async fn sync_clock(
    config: &Config,
    session: &SessionContext,
    follow: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    println!("Clock Sync");
    println!("═══════════════════════════════════════");

    let mut conn = SocketConnection::connect(&config.server.socket_url, session).await?;
    println!("✓ Connected to {}", config.server.socket_url);

    let mut sync = SyncSession::default();
    let correction = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        correction = run_sync(&mut conn, &mut sync, &config.sync) => correction?,
    };
    println!("✓ Correction: {:.1} ms", correction);

    if !follow {
        conn.close().await?;
        return Ok(());
    }

    println!("Following media state (Ctrl-C to stop)...");
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = conn.next_event() => event?,
        };
        if sync.dispatch(&event) != SyncEvent::MediaChanged {
            continue;
        }
        let (Some(status), Some(expected)) = (sync.media(), sync.expected_position()) else {
            continue;
        };
        info!(playing = status.playing, expected, "Media state changed");
        println!(
            "{} at {:.2}s",
            if status.playing { "▶ playing" } else { "⏸ paused" },
            expected
        );
    }

    conn.close().await?;
    Ok(())
}
