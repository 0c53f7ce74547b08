//! `mimic list` - print stored workflows.

use super::{open_feedback, open_store, workflow_dir};

pub fn execute(workflow_dir_flag: Option<String>, query: Option<String>) -> anyhow::Result<()> {
    let dir = workflow_dir(workflow_dir_flag);
    let store = open_store(&dir);

    let workflows = store.list_all();
    if workflows.is_empty() {
        println!("No stored workflows");
        return Ok(());
    }

    println!("Workflows ({}):\n", workflows.len());
    for workflow in &workflows {
        println!("  ID:          {}", workflow.workflow_id);
        println!("  Name:        {}", workflow.name);
        println!("  Description: {}", workflow.description);
        println!("  App:         {}", workflow.app_name);
        println!("  Steps:       {}", workflow.steps.len());
        println!(
            "  Tags:        {}",
            if workflow.tags.is_empty() { "-".to_string() } else { workflow.tags.join(", ") }
        );
        println!("  Confidence:  {:.2}", workflow.confidence);
        println!(
            "  Status:      {} (executed {} times)",
            workflow.status, workflow.execution_count
        );
        println!("  Created:     {}", workflow.created_at);
        if let Some(parent) = &workflow.parent_id {
            println!("  Variant of:  {parent}");
        }
        println!();
    }

    if let Some(query) = query {
        let feedback = open_feedback(&dir);
        let results = store.search(&query, Some(&feedback));
        println!("\nSearch '{}': {} hits", query, results.len());
        for workflow in results {
            println!("  - {}: {}", workflow.workflow_id, workflow.name);
        }
    }
    Ok(())
}
