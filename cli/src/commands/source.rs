use anyhow::{Result, bail};

use whey_core::TrackerService;
use whey_core::models::{NewProteinSource, UpdateProteinSource, parse_decimal};

use super::helpers::{print_json, print_source_table};

pub(crate) fn cmd_source_add(
    svc: &TrackerService,
    name: &str,
    protein: &str,
    category: &str,
    json: bool,
) -> Result<()> {
    let source = svc.create_source(&NewProteinSource {
        name: name.to_string(),
        protein_per_100g: parse_decimal("protein_per_100g", protein)?,
        category: category.to_string(),
    })?;

    if json {
        print_json(&source)?;
    } else {
        println!(
            "Added source: {} [{}] (ID: {})",
            source.name, source.category, source.id
        );
        println!("  {}g protein per 100g", source.protein_per_100g);
    }
    Ok(())
}

pub(crate) fn cmd_source_list(
    svc: &TrackerService,
    search: Option<&str>,
    json: bool,
) -> Result<()> {
    let sources = svc.list_sources(search)?;

    if json {
        return print_json(&sources);
    }
    if sources.is_empty() {
        match search {
            Some(q) => eprintln!("No sources match '{q}'"),
            None => eprintln!("No sources yet. Use `whey source add <name>` to add one."),
        }
        return Ok(());
    }
    print_source_table(&sources);
    Ok(())
}

pub(crate) fn cmd_source_update(
    svc: &TrackerService,
    id: i64,
    name: Option<String>,
    protein: Option<&str>,
    category: Option<String>,
    json: bool,
) -> Result<()> {
    let update = UpdateProteinSource {
        name,
        protein_per_100g: protein
            .map(|p| parse_decimal("protein_per_100g", p))
            .transpose()?,
        category,
    };
    if update.is_empty() {
        bail!("Nothing to update. Pass --name, --protein or --category");
    }

    let source = svc.update_source(id, &update)?;
    if json {
        print_json(&source)?;
    } else {
        println!(
            "Updated source {}: {} [{}], {}g protein per 100g",
            source.id, source.name, source.category, source.protein_per_100g
        );
    }
    Ok(())
}

/// Deleting a source also deletes every intake logged against it.
pub(crate) fn cmd_source_delete(svc: &TrackerService, id: i64, json: bool) -> Result<()> {
    let source = svc.get_source(id)?;
    svc.delete_source(id)?;

    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted source {id} ({}) and its intakes", source.name);
    }
    Ok(())
}
