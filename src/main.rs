use clap::{Parser, Subcommand};
use image_search::Result;
use image_search::commands::{
    HybridArgs, check_connection, configure, create_table, load_images, search_hybrid,
    search_image, search_text, show_status,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "image-search")]
#[command(about = "Index a directory of images and search it by image, caption or both")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Create the image table and its indexes
    CreateTable {
        /// Table to use instead of the configured one
        #[arg(long)]
        table_name: Option<String>,
    },
    /// Check that the vector database and embedding service are reachable
    CheckConnection,
    /// Embed, caption and store every image below a directory
    Load {
        /// Directory to scan for images
        #[arg(long)]
        dir: PathBuf,
        /// Records per upsert
        #[arg(long)]
        batch_size: Option<usize>,
        /// Table to use instead of the configured one
        #[arg(long)]
        table_name: Option<String>,
    },
    /// Find the images most similar to a query image
    Search {
        /// Query image
        image: PathBuf,
        /// Number of results
        #[arg(long)]
        top_k: Option<usize>,
        /// Table to use instead of the configured one
        #[arg(long)]
        table_name: Option<String>,
    },
    /// Find images whose caption matches a text query
    TextSearch {
        /// Full-text query
        query: String,
        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
        /// Table to use instead of the configured one
        #[arg(long)]
        table_name: Option<String>,
    },
    /// Combine image similarity with caption matching for a query image
    Hybrid {
        /// Query image
        image: PathBuf,
        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
        /// Weight of the image channel, between 0 and 1
        #[arg(long)]
        vector_weight: Option<f32>,
        /// Drop results farther than this vector distance
        #[arg(long)]
        distance_threshold: Option<f32>,
        /// Table to use instead of the configured one
        #[arg(long)]
        table_name: Option<String>,
    },
    /// Show row count, dimension and indexes of the image table
    Status {
        /// Table to use instead of the configured one
        #[arg(long)]
        table_name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            configure(show)?;
        }
        Commands::CreateTable { table_name } => {
            create_table(table_name.as_deref()).await?;
        }
        Commands::CheckConnection => {
            check_connection().await?;
        }
        Commands::Load {
            dir,
            batch_size,
            table_name,
        } => {
            load_images(&dir, batch_size, table_name.as_deref()).await?;
        }
        Commands::Search {
            image,
            top_k,
            table_name,
        } => {
            search_image(&image, top_k, table_name.as_deref()).await?;
        }
        Commands::TextSearch {
            query,
            limit,
            table_name,
        } => {
            search_text(&query, limit, table_name.as_deref()).await?;
        }
        Commands::Hybrid {
            image,
            limit,
            vector_weight,
            distance_threshold,
            table_name,
        } => {
            let args = HybridArgs {
                limit,
                vector_weight,
                distance_threshold,
                table: table_name.as_deref(),
            };
            search_hybrid(&image, args).await?;
        }
        Commands::Status { table_name } => {
            show_status(table_name.as_deref()).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["image-search", "check-connection"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::CheckConnection));
        }
    }

    #[test]
    fn load_command_with_dir() {
        let cli = Cli::try_parse_from(["image-search", "load", "--dir", "/photos"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Load {
                dir,
                batch_size,
                table_name,
            } = parsed.command
            {
                assert_eq!(dir, PathBuf::from("/photos"));
                assert_eq!(batch_size, None);
                assert_eq!(table_name, None);
            }
        }
    }

    #[test]
    fn load_command_requires_dir() {
        let cli = Cli::try_parse_from(["image-search", "load"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        }
    }

    #[test]
    fn search_command_with_top_k() {
        let cli = Cli::try_parse_from([
            "image-search",
            "search",
            "query.jpg",
            "--top-k",
            "5",
            "--table-name",
            "holidays",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Search {
                image,
                top_k,
                table_name,
            } = parsed.command
            {
                assert_eq!(image, PathBuf::from("query.jpg"));
                assert_eq!(top_k, Some(5));
                assert_eq!(table_name, Some("holidays".to_string()));
            }
        }
    }

    #[test]
    fn text_search_command() {
        let cli = Cli::try_parse_from(["image-search", "text-search", "dog in a park"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::TextSearch { query, limit, .. } = parsed.command {
                assert_eq!(query, "dog in a park");
                assert_eq!(limit, None);
            }
        }
    }

    #[test]
    fn hybrid_command_with_weights() {
        let cli = Cli::try_parse_from([
            "image-search",
            "hybrid",
            "query.png",
            "--vector-weight",
            "0.25",
            "--distance-threshold",
            "1.5",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Hybrid {
                vector_weight,
                distance_threshold,
                limit,
                ..
            } = parsed.command
            {
                assert_eq!(vector_weight, Some(0.25));
                assert_eq!(distance_threshold, Some(1.5));
                assert_eq!(limit, None);
            }
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["image-search", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["image-search", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["image-search", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
