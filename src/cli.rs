use std::path::PathBuf;

use chrono::NaiveDate;
use clap::builder::RangedU64ValueParser;
use clap::{Args, Parser, Subcommand};

use arbolado::models::{Activity, Health};

#[derive(Parser, Debug)]
#[command(name = "arbolado")]
#[command(about = "Una CLI para registrar el arbolado urbano, sus cuidados e identificar plantas")]
pub struct Cli {
    /// Archivo de configuración TOML (por defecto arbolado.toml si existe)
    #[arg(long, global = true, env = "ARBOLADO_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Registro de árboles
    #[command(subcommand)]
    Tree(TreeCommand),
    /// Bitácora de cuidados
    #[command(subcommand)]
    Log(LogCommand),
    /// Identificar la planta de una imagen (archivo o URL)
    Identify(IdentifyArgs),
    /// Diagnosticar enfermedades de una planta a partir de una imagen
    Diagnose {
        /// Ruta o URL de la imagen
        image: String,
    },
    /// Identificar en lote las imágenes de un archivo CSV o JSON
    Bulk(BulkArgs),
    /// Importar árboles o registros de cuidado desde CSV o JSON
    #[command(subcommand)]
    Import(ImportCommand),
    /// Ver estadísticas del arbolado
    Stats,
    /// Imprimir la plantilla CSV para identificación en lote
    Template,
}

#[derive(Subcommand, Debug)]
pub enum TreeCommand {
    /// Agregar nuevo árbol
    Add(TreeAddArgs),
    /// Ver árboles (todos o por ID de árbol)
    List {
        /// ID del árbol (ej. T-001)
        #[arg(long = "tree-id")]
        tree_id: Option<String>,
    },
    /// Actualizar árbol existente
    Update(TreeUpdateArgs),
}

#[derive(Args, Debug)]
pub struct TreeAddArgs {
    /// ID del árbol (ej. T-001)
    #[arg(long = "tree-id")]
    pub tree_id: String,
    /// Especie del árbol
    #[arg(short = 's', long)]
    pub species: String,
    /// Fecha de plantación (AAAA-MM-DD)
    #[arg(long = "planted")]
    pub planted_date: NaiveDate,
    /// Ubicación
    #[arg(short = 'l', long)]
    pub location: String,
    /// Responsable del cuidado
    #[arg(short = 'c', long)]
    pub caretaker: String,
    /// Estado de salud (Healthy, Needs Care, Critical)
    #[arg(long, default_value = "Healthy")]
    pub health: Health,
    /// Probabilidad de supervivencia (0-100)
    #[arg(long = "survival", value_parser = clap::value_parser!(u8).range(0..=100))]
    pub survival_probability: Option<u8>,
    /// Latitud
    #[arg(long, requires = "longitude", allow_hyphen_values = true)]
    pub latitude: Option<f64>,
    /// Longitud
    #[arg(long, requires = "latitude", allow_hyphen_values = true)]
    pub longitude: Option<f64>,
    /// Imagen del árbol a subir
    #[arg(long)]
    pub image: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct TreeUpdateArgs {
    /// ID del documento a actualizar (ObjectId)
    #[arg(long)]
    pub id: String,
    /// Nueva especie (opcional)
    #[arg(long)]
    pub species: Option<String>,
    /// Nueva ubicación (opcional)
    #[arg(long)]
    pub location: Option<String>,
    /// Nuevo responsable (opcional)
    #[arg(long)]
    pub caretaker: Option<String>,
    /// Nuevo estado de salud (opcional)
    #[arg(long)]
    pub health: Option<Health>,
    /// Fecha del último riego (AAAA-MM-DD)
    #[arg(long = "watered")]
    pub last_watered: Option<NaiveDate>,
    /// Nueva probabilidad de supervivencia (0-100)
    #[arg(long = "survival", value_parser = clap::value_parser!(u8).range(0..=100))]
    pub survival_probability: Option<u8>,
    /// Nueva imagen a subir (reemplaza la anterior)
    #[arg(long)]
    pub image: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum LogCommand {
    /// Registrar actividad de cuidado
    Add(LogAddArgs),
    /// Ver registros (todos o por ID de árbol)
    List {
        /// ID del árbol (ej. T-001)
        #[arg(long = "tree-id")]
        tree_id: Option<String>,
    },
    /// Actualizar registro existente
    Update(LogUpdateArgs),
}

#[derive(Args, Debug)]
pub struct LogAddArgs {
    /// ID del árbol (ej. T-001)
    #[arg(long = "tree-id")]
    pub tree_id: String,
    /// Actividad (Watering, Fertilizer, Pruning, Disease Treatment, Inspection)
    #[arg(short = 'a', long)]
    pub activity: Activity,
    /// Responsable
    #[arg(short = 'c', long)]
    pub caretaker: String,
    /// Fecha (AAAA-MM-DD, por defecto hoy)
    #[arg(long)]
    pub date: Option<NaiveDate>,
    /// Hora (HH:MM)
    #[arg(long, default_value = "00:00")]
    pub time: String,
    /// Especie del árbol
    #[arg(long)]
    pub species: Option<String>,
    /// Notas
    #[arg(long, default_value = "")]
    pub notes: String,
    /// Estado del registro
    #[arg(long, default_value = "completed")]
    pub status: String,
    /// Imagen a subir
    #[arg(long)]
    pub image: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct LogUpdateArgs {
    /// ID del registro a actualizar (ObjectId)
    #[arg(long)]
    pub id: String,
    /// Nuevo responsable (opcional)
    #[arg(long)]
    pub caretaker: Option<String>,
    /// Nuevas notas (opcional)
    #[arg(long)]
    pub notes: Option<String>,
    /// Nuevo estado (opcional)
    #[arg(long)]
    pub status: Option<String>,
    /// Nueva imagen a subir
    #[arg(long)]
    pub image: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct IdentifyArgs {
    /// Ruta o URL de la imagen
    pub image: String,
    /// Guardar el resultado como árbol con este ID
    #[arg(long = "tree-id")]
    pub tree_id: Option<String>,
    /// Ubicación para el árbol guardado
    #[arg(long, requires = "tree_id")]
    pub location: Option<String>,
    /// Fecha de plantación para el árbol guardado (AAAA-MM-DD)
    #[arg(long = "planted", requires = "tree_id")]
    pub planted_date: Option<String>,
}

#[derive(Args, Debug)]
pub struct BulkArgs {
    /// Archivo CSV o JSON con columna imageUrl
    pub file: PathBuf,
    /// Directorio donde escribir el CSV de resultados
    #[arg(short = 'o', long = "out", default_value = ".")]
    pub out_dir: PathBuf,
    /// No guardar los árboles detectados
    #[arg(long)]
    pub no_save: bool,
    /// Máximo de imágenes procesándose a la vez (al menos 1)
    #[arg(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub max_in_flight: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum ImportCommand {
    /// Importar árboles
    Trees {
        /// Archivo CSV o JSON
        file: PathBuf,
    },
    /// Importar registros de cuidado
    Logs {
        /// Archivo CSV o JSON
        file: PathBuf,
    },
}
