//! Fixtures shared by unit tests.

use ff_core::{CategoryScheme, Channel, FractionGroup, Histogram, ProcessGroups};
use ff_io::{TemplateKey, TemplateStore};

/// One-bin templates over `[0, 1]` with fixed fractions per category.
///
/// Data is 100 in every cell. The `W` process of category `i` is
/// `10 * (i + 1)`; every other process is empty, so the W fraction is
/// `0.1 * (i + 1)` and QCD takes the rest.
pub(crate) fn uniform_store(
    channel: Channel,
    scheme: &CategoryScheme,
    era: &str,
    expression: &str,
) -> TemplateStore {
    let mut store = TemplateStore::new();
    let groups = ProcessGroups::default_for(channel);
    for (key, category) in scheme.iter() {
        for (group, processes) in groups.iter() {
            for process in processes {
                let content = match (group, process.as_str()) {
                    (FractionGroup::Data, _) => 100.0,
                    (FractionGroup::W, "W") => 10.0 * (key.index as f64 + 1.0),
                    _ => 0.0,
                };
                let h = Histogram::from_cells(
                    process.as_str(),
                    vec![0.0, 1.0],
                    vec![content, content, content],
                )
                .unwrap();
                let k = TemplateKey::new(channel, category, process, era, expression);
                store.insert(k.render(), h);
            }
        }
    }
    store
}
