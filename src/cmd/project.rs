//! Project initialization: `mare init`.

use anyhow::Result;
use console::style;
use std::path::Path;

pub fn cmd_init(project_dir: &Path, template: &str, name: Option<&str>) -> Result<()> {
    use mare::init::init_project;
    use mare::mare_config::ProjectTemplate;
    use mare::ui::icons::{CHECK, FILE_NEW};

    let template: ProjectTemplate = template.parse().map_err(anyhow::Error::msg)?;
    let result = init_project(project_dir, template, name)?;

    if result.created {
        println!(
            "{}Initialized mare project at {}",
            CHECK,
            result.mare_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .mare/");
        println!("  ├── mare.toml      # Project configuration");
        println!("  ├── workspace/     # Artifacts and execution history");
        println!("  └── logs/          # Log files and role transcripts");
        println!("  input/");
        println!("  └── requirements.md  # Describe your system here");
        println!("  output/            # Final specification of the last run");
        println!();
        println!("Next steps:");
        println!("  1. Edit input/requirements.md");
        println!("  2. Run `mare run` (or `mare run --offline` to try it without a model)");
    } else {
        println!(
            "mare project already initialized at {}",
            result.mare_dir.display()
        );
        if result.files_written.is_empty() {
            println!("Directory structure verified.");
        }
    }

    for path in &result.files_written {
        let shown = path.strip_prefix(project_dir).unwrap_or(path);
        println!("  {}{}", FILE_NEW, style(shown.display()).dim());
    }

    Ok(())
}
