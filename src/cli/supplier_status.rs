use super::config::CustodiaConfig;
use custodia::ids::PeerId;
use custodia::store::{FsLabelStore, LabelStore};
use custodia::supplier::ConnectorState;

/// Print the persisted label of each supplier and the state a connector
/// would start in.
pub fn execute(
    config: &CustodiaConfig,
    customer: &str,
    suppliers: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let labels = FsLabelStore::new(config.storage.labels_dir());
    let customer = PeerId::new(customer);

    println!("Customer: {}", customer);
    for (supplier, label, state) in statuses(&labels, &customer, suppliers) {
        println!(
            "  {:<32} {:<14} starts {}",
            supplier,
            label.as_deref().unwrap_or("-"),
            state
        );
    }
    Ok(())
}

fn statuses(
    labels: &dyn LabelStore,
    customer: &PeerId,
    suppliers: &[String],
) -> Vec<(PeerId, Option<String>, ConnectorState)> {
    suppliers
        .iter()
        .map(|s| {
            let supplier = PeerId::new(s.as_str());
            let label = labels.load(customer, &supplier);
            let state = ConnectorState::from_persisted(label.as_deref());
            (supplier, label, state)
        })
        .collect()
}
