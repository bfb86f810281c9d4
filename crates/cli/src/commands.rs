//! Command handlers: call into the service and print the outcome.

use anyhow::{Context, Result};
use chrono::Local;
use gamekeep_core::{Checkpoint, CheckpointService};

const MAX_NOTE_LEN: usize = 40;

pub fn add_game(service: &CheckpointService, name: &str, path: &str) -> Result<()> {
    let game = service.add_game(name, path).context("failed to add game")?;

    println!("✓ Game added successfully");
    println!("  ID:   {}", game.id);
    println!("  Name: {}", game.name);
    println!("  Path: {}", game.save_path.display());
    Ok(())
}

pub fn list_games(service: &CheckpointService) -> Result<()> {
    let games = service.list_games().context("failed to list games")?;
    if games.is_empty() {
        println!("No games registered yet.");
        println!("Use 'gamekeep add-game --name \"Game Name\" --path \"/path/to/saves\"' to add one.");
        return Ok(());
    }

    println!("Registered Games ({}):\n", games.len());
    let id_width = column_width("ID", games.iter().map(|game| game.id.as_str()));
    let name_width = column_width("NAME", games.iter().map(|game| game.name.as_str()));
    println!("{:<id_width$}   {:<name_width$}   SAVE PATH", "ID", "NAME");
    for game in &games {
        println!(
            "{:<id_width$}   {:<name_width$}   {}",
            game.id,
            game.name,
            game.save_path.display()
        );
    }
    Ok(())
}

pub fn create_checkpoint(
    service: &CheckpointService,
    game: &str,
    name: &str,
    note: &str,
) -> Result<()> {
    println!("Creating checkpoint...");
    let checkpoint = service
        .create_checkpoint(game, name, note)
        .context("failed to create checkpoint")?;

    println!("✓ Checkpoint created successfully");
    println!("  ID:      {}", checkpoint.id);
    println!("  Name:    {}", checkpoint.name);
    if !checkpoint.note.is_empty() {
        println!("  Note:    {}", checkpoint.note);
    }
    println!("  Created: {}", checkpoint.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Hash:    {}...", &checkpoint.content_hash[..16.min(checkpoint.content_hash.len())]);
    Ok(())
}

pub fn list_checkpoints(service: &CheckpointService, game: &str) -> Result<()> {
    let checkpoints = service
        .list_checkpoints(game)
        .context("failed to list checkpoints")?;
    if checkpoints.is_empty() {
        println!("No checkpoints found for game: {game}");
        return Ok(());
    }

    println!("Checkpoints for {game} ({}):\n", checkpoints.len());
    let name_width = column_width("NAME", checkpoints.iter().map(|cp| cp.name.as_str()));
    println!("{:<8}   {:<name_width$}   {:<16}   NOTE", "ID", "NAME", "CREATED");
    for checkpoint in &checkpoints {
        println!(
            "{:<8}   {:<name_width$}   {:<16}   {}",
            checkpoint.short_id(),
            checkpoint.name,
            checkpoint.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            truncate_note(&checkpoint.note)
        );
    }
    Ok(())
}

pub fn restore_checkpoint(service: &CheckpointService, checkpoint: &str) -> Result<()> {
    let found = service
        .get_checkpoint(checkpoint)
        .context("failed to get checkpoint")?;
    println!("Restoring checkpoint...");
    print_summary(&found);

    service
        .restore_checkpoint(&found.id)
        .context("failed to restore checkpoint")?;
    println!("✓ Checkpoint restored successfully");
    Ok(())
}

pub fn delete_checkpoint(service: &CheckpointService, checkpoint: &str) -> Result<()> {
    match service.delete_checkpoint(checkpoint) {
        Ok(_) => {}
        Err(err) if err.is_warning() => {
            tracing::warn!(error = %err, "Checkpoint deleted with warnings");
            eprintln!("{err}");
        }
        Err(err) => return Err(err).context("failed to delete checkpoint"),
    }
    println!("✓ Checkpoint deleted successfully");
    Ok(())
}

fn print_summary(checkpoint: &Checkpoint) {
    println!("  Name:    {}", checkpoint.name);
    println!("  Created: {}", checkpoint.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();
}

fn column_width<'a>(header: &str, values: impl Iterator<Item = &'a str>) -> usize {
    values
        .map(|value| value.chars().count())
        .chain(std::iter::once(header.len()))
        .max()
        .unwrap_or(0)
}

fn truncate_note(note: &str) -> String {
    if note.chars().count() <= MAX_NOTE_LEN {
        return note.to_string();
    }
    let kept: String = note.chars().take(MAX_NOTE_LEN - 3).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_notes_are_truncated() {
        assert_eq!(truncate_note("short"), "short");
        let long = "x".repeat(60);
        let truncated = truncate_note(&long);
        assert_eq!(truncated.chars().count(), MAX_NOTE_LEN);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn column_width_covers_header_and_values() {
        assert_eq!(column_width("ID", ["a", "abcdef"].into_iter()), 6);
        assert_eq!(column_width("NAME", std::iter::empty()), 4);
    }
}
