mod autoindex;
mod description;
mod listing;
mod model;
mod options;
mod render;
mod resize;
mod serve;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use options::{GalleryOptions, Placement};

#[derive(Parser)]
#[command(
    name = "index-gallery",
    about = "Transforme un listing de dossier HTTP en galerie photo"
)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,
    #[command(subcommand)]
    command: Commands,
}

/// Options given on the command line, applied over the config file.
#[derive(Args)]
struct Overrides {
    /// Fichier de configuration JSON
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Position des sous-dossiers dans la galerie
    #[arg(long, global = true, value_enum)]
    show_sub_folders: Option<Placement>,
    /// Position du lien vers le dossier parent
    #[arg(long, global = true, value_enum)]
    show_parent_link: Option<Placement>,
    /// URL du générateur de vignettes (`%` = URL de l'image)
    #[arg(long, global = true)]
    thumbnail_generator: Option<String>,
}

impl Overrides {
    fn options(&self) -> Result<GalleryOptions> {
        let mut options = match &self.config {
            Some(path) => GalleryOptions::load(path)?,
            None => GalleryOptions::default(),
        };
        if let Some(placement) = self.show_sub_folders {
            options.show_sub_folders = placement;
        }
        if let Some(placement) = self.show_parent_link {
            options.show_parent_link = placement;
        }
        if let Some(url) = &self.thumbnail_generator {
            options.thumbnail_generator_url = Some(url.clone());
        }
        Ok(options)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Générer la galerie d'un listing (URL ou fichier HTML)
    Render {
        /// URL du listing ou fichier HTML local
        source: String,
        /// Fichier de sortie (par défaut : sortie standard)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// URL publique de la page, pour résoudre les liens relatifs
        #[arg(long)]
        page_url: Option<String>,
    },
    /// Servir un dossier sous forme de galerie, avec redimensionnement à la volée
    Serve {
        /// Dossier racine
        root: PathBuf,
        /// Port du serveur (par défaut : 8080)
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
    /// Générer les vignettes manquantes d'un dossier
    Thumbs {
        /// Dossier contenant les photos
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let options = cli.overrides.options()?;

    match cli.command {
        Commands::Render {
            source,
            output,
            page_url,
        } => render::run_render(&source, output.as_deref(), page_url.as_deref(), &options),
        Commands::Serve { root, port } => serve::run_serve(&root, port, options),
        Commands::Thumbs { dir } => resize::run_thumbs(&dir, &options),
    }
}
