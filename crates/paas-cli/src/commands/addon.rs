use paas_compose::{AddonStore, NewAddon};
use paas_core::Result;

use super::App;
use crate::output::Outcome;
use crate::AddonCommands;

pub async fn run(app: &App, action: AddonCommands) -> Result<Outcome> {
    let store = AddonStore::new(&app.ctx);
    match action {
        AddonCommands::Add {
            app: name,
            name: addon,
            pack,
            fragment,
        } => {
            let record = store
                .add(NewAddon {
                    app: name,
                    name: addon,
                    pack,
                    fragment,
                })
                .await?;
            Outcome::live()
                .field("app", &record.app)
                .field("addon", &record.name)
                .field("merge_strategy", &record.merge_strategy)
                .field("fragment_path", &record.fragment_path)
                .data(&record)
        }
        AddonCommands::List { app: name } => {
            let rows = store.list(&name).await?;
            let lines: Vec<String> = rows
                .iter()
                .map(|r| format!("{} pack={} fragment={}", r.name, r.pack, r.fragment_path))
                .collect();
            Outcome::live()
                .field("app", name.trim())
                .field("count", rows.len())
                .rows(lines)
                .data(&rows)
        }
        AddonCommands::Remove { app: name, name: addon } => {
            let removed = store.remove(&name, &addon).await?;
            Ok(Outcome::live()
                .field("app", &removed.app)
                .field("removed", &removed.name))
        }
    }
}
