use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use arbolado::analytics::summarize;
use arbolado::bulk::{rows_from_records, tree_from_detection, BulkIdentifier, BulkOptions, BulkRow};
use arbolado::classifier::{HttpClassifier, ImageSource};
use arbolado::config::Config;
use arbolado::db::{CareLogRepository, MongoStore, TreeRepository};
use arbolado::export::{export_to_dir, TEMPLATE_CSV};
use arbolado::health::{Assessment, ClassifierAssessor, HealthAssessor, Severity};
use arbolado::identify::Identifier;
use arbolado::import::{import_care_logs, import_trees, ImportSummary};
use arbolado::models::{CareLogEntry, CareLogUpdate, Coordinates, Detection, SaveOutcome, Tree, TreeUpdate};
use arbolado::storage::{ImageOwner, ImageStore, LocalImageStore};
use arbolado::tabular;

mod cli;
mod ui;

use cli::{
    BulkArgs, Cli, Commands, IdentifyArgs, ImportCommand, LogAddArgs, LogCommand, LogUpdateArgs,
    TreeAddArgs, TreeCommand, TreeUpdateArgs,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Error al cargar la configuración")?;

    match cli.command {
        Commands::Template => print!("{TEMPLATE_CSV}"),
        Commands::Tree(command) => {
            let store = connect(&config).await?;
            let images = LocalImageStore::from_config(&config.images);
            match command {
                TreeCommand::Add(args) => add_tree(store.as_ref(), &images, args).await?,
                TreeCommand::List { tree_id } => list_trees(store.as_ref(), tree_id).await?,
                TreeCommand::Update(args) => update_tree(store.as_ref(), &images, args).await?,
            }
        }
        Commands::Log(command) => {
            let store = connect(&config).await?;
            let images = LocalImageStore::from_config(&config.images);
            match command {
                LogCommand::Add(args) => add_log(store.as_ref(), &images, args).await?,
                LogCommand::List { tree_id } => list_logs(store.as_ref(), tree_id).await?,
                LogCommand::Update(args) => update_log(store.as_ref(), &images, args).await?,
            }
        }
        Commands::Identify(args) => identify(&config, args).await?,
        Commands::Diagnose { image } => diagnose(&config, &image).await?,
        Commands::Bulk(args) => bulk(&config, args).await?,
        Commands::Import(command) => {
            let store = connect(&config).await?;
            let summary = match command {
                ImportCommand::Trees { file } => {
                    let records = read_table(&file).await?;
                    import_trees(store.as_ref(), &records).await
                }
                ImportCommand::Logs { file } => {
                    let records = read_table(&file).await?;
                    import_care_logs(store.as_ref(), &records).await
                }
            };
            print_import_summary(&summary);
        }
        Commands::Stats => stats(&config).await?,
    }

    Ok(())
}

async fn connect(config: &Config) -> Result<Arc<MongoStore>> {
    let store = MongoStore::connect(&config.store)
        .await
        .context("Error al conectar con MongoDB")?;
    Ok(Arc::new(store))
}

async fn read_table(path: &Path) -> Result<Vec<tabular::Record>> {
    tabular::read_file(path)
        .await
        .with_context(|| format!("Error al leer el archivo '{}'", path.display()))
}

async fn upload_image(images: &dyn ImageStore, owner: ImageOwner<'_>, path: &Path) -> Result<String> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Error al leer la imagen '{}'", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image");
    let url = images
        .upload(owner, name, &data)
        .await
        .context("Error al subir la imagen")?;
    Ok(url)
}

async fn add_tree(store: &dyn TreeRepository, images: &dyn ImageStore, args: TreeAddArgs) -> Result<()> {
    let mut tree = Tree::new(
        args.tree_id,
        args.species,
        args.planted_date,
        args.location,
        args.caretaker,
    );
    tree.health = args.health;
    if let Some(survival) = args.survival_probability {
        tree.survival_probability = survival;
    }
    if let (Some(latitude), Some(longitude)) = (args.latitude, args.longitude) {
        tree.coordinates = Some(Coordinates { latitude, longitude });
    }
    if let Some(path) = &args.image {
        tree.image_url = Some(upload_image(images, ImageOwner::Tree(&tree.tree_id), path).await?);
    }

    let image_url = tree.image_url.clone();
    match store.create_tree(tree).await {
        Ok(id) => {
            println!("Árbol agregado, ID: {}", id);
            Ok(())
        }
        Err(e) => {
            discard_image(images, image_url.as_deref()).await;
            Err(e).context("Error al agregar árbol")
        }
    }
}

// Removes an uploaded image whose document was never written.
async fn discard_image(images: &dyn ImageStore, url: Option<&str>) {
    if let Some(url) = url {
        if let Err(e) = images.delete(url).await {
            tracing::warn!(url, error = %e, "Failed to remove orphaned image");
        }
    }
}

async fn list_trees(store: &dyn TreeRepository, tree_id: Option<String>) -> Result<()> {
    let trees = match tree_id {
        Some(tree_id) => store.trees_by_tree_id(&tree_id).await,
        None => store.list_trees().await,
    }
    .context("Error al buscar árboles")?;

    if trees.is_empty() {
        println!("No se encontraron árboles");
        return Ok(());
    }

    for tree in trees {
        println!(
            "Árbol: '{}'\nEspecie: '{}'\nPlantado: {}\nUbicación: '{}'\nResponsable: '{}'\nSalud: {}\nÚltimo riego: {}\nSupervivencia: {}%\nID: '{}'",
            tree.tree_id,
            tree.species,
            tree.planted_date,
            tree.location,
            tree.caretaker,
            tree.health,
            tree.last_watered,
            tree.survival_probability,
            tree.id.map(|id| id.to_hex()).unwrap_or_default(),
        );
        if let Some(coordinates) = tree.coordinates {
            println!("Coordenadas: {}, {}", coordinates.latitude, coordinates.longitude);
        }
        if let Some(plant) = tree.detected_plant {
            println!("Planta detectada: '{}'", plant);
        }
        if let Some(disease) = tree.detected_disease {
            println!("Enfermedad detectada: '{}'", disease);
        }
        if let Some(url) = tree.image_url {
            println!("Imagen: {}", url);
        }
        println!();
    }

    Ok(())
}

async fn update_tree(
    store: &dyn TreeRepository,
    images: &dyn ImageStore,
    args: TreeUpdateArgs,
) -> Result<()> {
    let mut update = TreeUpdate {
        species: args.species,
        location: args.location,
        caretaker: args.caretaker,
        health: args.health,
        last_watered: args.last_watered,
        survival_probability: args.survival_probability,
        image_url: None,
    };
    if update.is_empty() && args.image.is_none() {
        println!("No se proporcionaron cambios para actualizar");
        return Ok(());
    }

    let Some(tree) = store
        .tree_by_id(&args.id)
        .await
        .context("Error al buscar árbol")?
    else {
        println!("No existe un árbol con ID {}", args.id);
        return Ok(());
    };

    if let Some(path) = &args.image {
        update.image_url = Some(upload_image(images, ImageOwner::Tree(&tree.tree_id), path).await?);
    }

    match store.update_tree(&args.id, &update).await {
        Ok(true) => {
            println!("Árbol ID {} actualizado", args.id);
            Ok(())
        }
        Ok(false) => {
            discard_image(images, update.image_url.as_deref()).await;
            println!("No existe un árbol con ID {}", args.id);
            Ok(())
        }
        Err(e) => {
            discard_image(images, update.image_url.as_deref()).await;
            Err(e).context("Error al actualizar árbol")
        }
    }
}

async fn add_log(
    store: &(impl TreeRepository + CareLogRepository),
    images: &dyn ImageStore,
    args: LogAddArgs,
) -> Result<()> {
    let date = args.date.unwrap_or_else(|| Utc::now().date_naive());
    let mut entry = CareLogEntry::new(args.tree_id, args.activity, args.caretaker, date);
    entry.time = args.time;
    entry.notes = args.notes;
    entry.status = args.status;

    entry.species = match args.species {
        Some(species) => species,
        None => store
            .trees_by_tree_id(&entry.tree_id)
            .await
            .context("Error al buscar el árbol")?
            .into_iter()
            .next()
            .map(|tree| tree.species)
            .unwrap_or_else(|| "Unknown".to_string()),
    };

    if let Some(path) = &args.image {
        let log_id = format!("log-{}", Utc::now().timestamp_millis());
        entry.image_url = Some(upload_image(images, ImageOwner::CareLog(&log_id), path).await?);
    }

    let image_url = entry.image_url.clone();
    match store.create_care_log(entry).await {
        Ok(id) => {
            println!("Registro agregado, ID: {}", id);
            Ok(())
        }
        Err(e) => {
            discard_image(images, image_url.as_deref()).await;
            Err(e).context("Error al agregar registro")
        }
    }
}

async fn list_logs(store: &dyn CareLogRepository, tree_id: Option<String>) -> Result<()> {
    let logs = match tree_id {
        Some(tree_id) => store.care_logs_for_tree(&tree_id).await,
        None => store.list_care_logs().await,
    }
    .context("Error al buscar registros")?;

    if logs.is_empty() {
        println!("No se encontraron registros");
        return Ok(());
    }

    for log in logs {
        println!(
            "{} {} | {} | Árbol: '{}' ({}) | Por: '{}' | Estado: {} | ID: '{}'",
            log.date,
            log.time,
            log.activity,
            log.tree_id,
            log.species,
            log.caretaker,
            log.status,
            log.id.map(|id| id.to_hex()).unwrap_or_default(),
        );
        if !log.notes.is_empty() {
            println!("  Notas: '{}'", log.notes);
        }
        if let Some(url) = log.image_url {
            println!("  Imagen: {}", url);
        }
    }

    Ok(())
}

async fn update_log(
    store: &dyn CareLogRepository,
    images: &dyn ImageStore,
    args: LogUpdateArgs,
) -> Result<()> {
    let mut update = CareLogUpdate {
        caretaker: args.caretaker,
        notes: args.notes,
        status: args.status,
        image_url: None,
    };
    if let Some(path) = &args.image {
        update.image_url = Some(upload_image(images, ImageOwner::CareLog(&args.id), path).await?);
    }

    if update.is_empty() {
        println!("No se proporcionaron cambios para actualizar");
        return Ok(());
    }

    let found = store
        .update_care_log(&args.id, &update)
        .await
        .context("Error al actualizar registro")?;
    if found {
        println!("Registro ID {} actualizado", args.id);
    } else {
        discard_image(images, update.image_url.as_deref()).await;
        println!("No existe un registro con ID {}", args.id);
    }
    Ok(())
}

async fn identify(config: &Config, args: IdentifyArgs) -> Result<()> {
    config.validate_classifier()?;
    let classifier = Arc::new(HttpClassifier::new(&config.classifier)?);
    let identifier = Identifier::new(classifier);

    let source = ImageSource::from_reference(&args.image);
    let spinner = ui::Spinner::new();
    let detection = identifier
        .identify(&source, &spinner)
        .await
        .with_context(|| format!("No se pudo identificar '{}'", args.image))?;

    print_detection(&detection);

    if let Some(tree_id) = args.tree_id {
        let store = connect(config).await?;
        let row = BulkRow {
            image_url: source.reference(),
            tree_id: Some(tree_id.clone()),
            location: args.location,
            planted_date: args.planted_date,
        };
        let tree = tree_from_detection(&tree_id, &row, &detection, Utc::now().date_naive());
        let id = store
            .create_tree(tree)
            .await
            .context("Error al guardar el árbol detectado")?;
        println!("Árbol {} guardado, ID: {}", tree_id, id);
    }

    Ok(())
}

fn print_detection(detection: &Detection) {
    println!("Planta: {}", detection.plant_name);
    if let Some(species) = &detection.species {
        println!("Especie: {}", species);
    }
    println!("Salud: {}", detection.health);
    if let Some(confidence) = detection.confidence {
        println!("Confianza: {:.0}%", confidence);
    }
    if let Some(disease) = &detection.disease {
        println!("Enfermedad: {}", disease);
    }
    if let Some(treatment) = &detection.treatment {
        println!("Tratamiento: {}", treatment);
    }
    if !detection.characteristics.is_empty() {
        println!("Características:");
        for characteristic in &detection.characteristics {
            println!("  - {}", characteristic);
        }
    }
}

async fn diagnose(config: &Config, image: &str) -> Result<()> {
    config.validate_classifier()?;
    let classifier = Arc::new(HttpClassifier::new(&config.classifier)?);
    let assessor = ClassifierAssessor::new(Identifier::new(classifier));

    let spinner = ui::Spinner::new();
    let assessment = assessor
        .assess(&ImageSource::from_reference(image), &spinner)
        .await
        .with_context(|| format!("No se pudo diagnosticar '{}'", image))?;

    print_assessment(&assessment);
    Ok(())
}

fn print_assessment(assessment: &Assessment) {
    if assessment.is_healthy() {
        println!("La planta se ve sana");
    } else {
        println!("Enfermedad: {}", assessment.disease);
    }
    if let Some(confidence) = assessment.confidence {
        println!("Confianza: {:.0}%", confidence);
    }
    let severity = match assessment.severity {
        Severity::Low => "Baja",
        Severity::Medium => "Media",
        Severity::High => "Alta",
    };
    println!("Severidad: {}", severity);

    for (title, lines) in [
        ("Síntomas", &assessment.symptoms),
        ("Tratamiento", &assessment.treatment),
        ("Prevención", &assessment.preventive_measures),
    ] {
        if lines.is_empty() {
            continue;
        }
        println!("{}:", title);
        for line in lines {
            println!("  - {}", line);
        }
    }
}

async fn bulk(config: &Config, args: BulkArgs) -> Result<()> {
    config.validate_classifier()?;

    let records = read_table(&args.file).await?;
    let rows = rows_from_records(&records);
    if rows.is_empty() {
        println!("No se encontraron filas con imagen en '{}'", args.file.display());
        return Ok(());
    }

    let mut options = BulkOptions::from(&config.bulk);
    if let Some(max_in_flight) = args.max_in_flight {
        options.max_in_flight = max_in_flight;
    }
    options.auto_save = !args.no_save;

    let classifier = Arc::new(HttpClassifier::new(&config.classifier)?);
    let mut bulk = BulkIdentifier::new(classifier, options);
    if !args.no_save {
        let store: Arc<dyn TreeRepository> = connect(config).await?;
        bulk = bulk.with_store(store);
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight rows");
            ctrl_c.cancel();
        }
    });

    let progress = ui::BulkProgress::new(rows.len());
    let report = bulk.run(rows, &progress, &cancel).await;
    progress.finish();

    println!(
        "Procesadas: {} | Identificadas: {} | Fallidas: {} | Guardadas: {}",
        report.results.len(),
        report.succeeded(),
        report.failed(),
        report.saved()
    );
    for result in report.save_failures() {
        if let Some(SaveOutcome::Failed { error }) = &result.saved {
            println!("No se pudo guardar '{}': {}", result.image_url, error);
        }
    }
    if report.cancelled {
        println!("Proceso cancelado; las filas pendientes se marcaron como 'Cancelled'");
    }

    let path = export_to_dir(&args.out_dir, &report.results)
        .await
        .context("Error al exportar resultados")?;
    println!("Resultados exportados a {}", path.display());

    Ok(())
}

fn print_import_summary(summary: &ImportSummary) {
    println!("Importados: {} | Fallidos: {}", summary.success, summary.failed);
    for error in &summary.errors {
        println!("  - {}", error);
    }
}

async fn stats(config: &Config) -> Result<()> {
    let store = connect(config).await?;
    let trees = store.list_trees().await.context("Error al buscar árboles")?;
    let logs = store.list_care_logs().await.context("Error al buscar registros")?;
    let summary = summarize(&trees, &logs, Utc::now().date_naive());

    println!("Árboles: {}", summary.total_trees);
    println!(
        "  Sanos: {} | Necesitan cuidado: {} | Críticos: {}",
        summary.health.healthy, summary.health.needs_care, summary.health.critical
    );
    match summary.average_survival {
        Some(average) => println!("Supervivencia promedio: {:.1}%", average),
        None => println!("Supervivencia promedio: -"),
    }
    println!("Requieren atención: {}", summary.needing_attention);
    println!("Plantados en los últimos 30 días: {}", summary.planted_recently);
    println!("Responsables: {}", summary.caretakers);
    println!();
    println!("Actividades registradas: {}", summary.total_activities);
    for (activity, count) in &summary.activities {
        println!("  {}: {}", activity, count);
    }
    println!("Tasa de mantenimiento: {:.0}%", summary.maintenance_rate);
    println!("Tratamientos de enfermedad: {}", summary.disease_treatments);
    println!("Inspecciones: {}", summary.inspections);

    if !summary.species_health.is_empty() {
        println!();
        println!("Salud por especie:");
        for (species, counts) in &summary.species_health {
            println!(
                "  {}: {} sanos, {} necesitan cuidado, {} críticos",
                species, counts.healthy, counts.needs_care, counts.critical
            );
        }
    }

    Ok(())
}
