use clap::Parser;
use small_dataloader::core::extractor::parse_select_fields;
use small_dataloader::core::field_mapper::FieldMapping;
use small_dataloader::core::row_reader::RowReader;
use small_dataloader::utils::error::{ErrorSeverity, LoaderError};
use small_dataloader::utils::logger::{self, LogFormat};
use small_dataloader::{
    CliConfig, HttpRemoteClient, LoaderEngine, OperationConfig, RemoteSettings, TomlConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliConfig::parse();

    // 載入 TOML 配置
    let mut config = match TomlConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", args.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    // 初始化日誌
    let log_format = config
        .monitoring
        .log_format
        .as_deref()
        .and_then(LogFormat::from_name)
        .unwrap_or_default();
    logger::init_logger(args.verbose, config.monitoring.log_level.as_deref(), log_format);

    tracing::info!("🚀 Starting small-dataloader");
    tracing::info!("📁 Loaded configuration from: {}", args.config);

    // 應用命令列覆蓋設定
    args.apply_overrides(&mut config);

    // 驗證並解析配置
    let resolved = OperationConfig::from_toml(&config)
        .and_then(|operation| RemoteSettings::from_toml(&config).map(|remote| (operation, remote)));
    let (operation, remote) = match resolved {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::error!("❌ Configuration validation failed: {}", e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(1);
        }
    };

    tracing::info!("✅ Configuration loaded and validated successfully");
    display_config_summary(&operation, &remote, args.dry_run);

    if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - the remote service will not be contacted");
        if let Err(e) = perform_dry_run(&operation) {
            fail(e);
        }
        return Ok(());
    }

    if operation.monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let client = match HttpRemoteClient::new(&remote) {
        Ok(client) => client,
        Err(source) => fail(LoaderError::RemoteUnavailable {
            endpoint: remote.endpoint.clone(),
            source,
        }),
    };
    let engine = LoaderEngine::new(client, operation);

    match engine.run().await {
        Ok(summary) => {
            println!("✅ {} completed", summary.operation);
            println!(
                "📊 {} rows in {} batches: {} succeeded, {} failed",
                summary.processed, summary.batches, summary.successes, summary.errors
            );
            for path in [&summary.output_path, &summary.success_path, &summary.error_path]
                .into_iter()
                .flatten()
            {
                println!("📁 {}", path.display());
            }
        }
        Err(e) => fail(e),
    }

    Ok(())
}

fn fail(e: LoaderError) -> ! {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ Run failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Medium => 2,   // 遠端錯誤，可重試
        ErrorSeverity::High => 1,     // 資料或配置錯誤
        ErrorSeverity::Critical => 3, // 系統錯誤
    };
    std::process::exit(exit_code);
}

fn display_config_summary(operation: &OperationConfig, remote: &RemoteSettings, dry_run: bool) {
    println!("📋 Configuration Summary:");
    println!("  Operation: {}", operation.operation);
    println!("  Entity: {}", operation.entity);
    println!("  Endpoint: {}", remote.endpoint);
    println!(
        "  Encoding: read {}, write {}",
        operation.read_encoding, operation.write_encoding
    );

    if operation.operation.is_extract() {
        if let Some(query) = &operation.query {
            println!("  Query: {}", query);
        }
        println!("  Extract Batch Size: {}", operation.extract_batch_size);
    } else {
        if let Some(input) = &operation.input_path {
            println!("  Input: {}", input.display());
        }
        println!("  Batch Size: {}", operation.load_batch_size);
        println!("  Success File: {}", operation.success_path.display());
        println!("  Error File: {}", operation.error_path.display());
    }

    if dry_run {
        println!("  🔍 DRY RUN MODE ENABLED");
    }

    println!();
}

/// Checks what can be checked without the remote service: the input header
/// and the mapping for loads, the select list for extracts.
fn perform_dry_run(operation: &OperationConfig) -> small_dataloader::Result<()> {
    println!("🔍 Dry Run Analysis:");

    if operation.operation.is_extract() {
        let fields = parse_select_fields(operation.query.as_deref().unwrap_or_default())?;
        println!("  Output columns: {}", fields.join(", "));
    } else if let Some(input) = &operation.input_path {
        let reader = RowReader::open(input, operation.read_encoding, operation.delimiter)?;
        let columns = reader.columns().to_vec();
        println!("  Input columns: {}", columns.join(", "));

        let mapping = match &operation.mapping_file {
            Some(path) => FieldMapping::from_file(path)?,
            None => FieldMapping::auto_match(&columns, &[]),
        };
        let resolved = mapping.resolve(&columns)?;
        resolved.validate_for(operation.operation, operation.external_id_field.as_deref())?;

        println!();
        println!("🔄 Field Mapping:");
        for field in resolved.destination_fields() {
            println!("  -> {}", field);
        }
    }

    println!();
    println!("✅ Dry run analysis complete. Use --verbose for more details during actual run.");
    Ok(())
}
