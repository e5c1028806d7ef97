use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;
use log::{info, LevelFilter};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use simple_logger::SimpleLogger;

use tx_relay::{
    random_topology, LinkSpeeds, NodeConfig, NodeStatistics, PeerId, ProtocolSettings, RelayNode,
    SimNetwork,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    SimpleLogger::new().with_level(LevelFilter::Info).init()?;

    info!("starting");

    let num_of_nodes: u64 = 200;
    let out_degree = 8;
    let time_to_run_seconds = 300.0;
    let seed: u64 = rand::thread_rng().gen();
    let mut rng = StdRng::seed_from_u64(seed);

    let ids: Vec<PeerId> = (1..=num_of_nodes).collect();
    let edges = random_topology(&ids, out_degree, &mut rng);

    // a few slow links to make bandwidth visible
    let speeds: HashMap<PeerId, LinkSpeeds> = ids
        .iter()
        .map(|&id| {
            let upload = if rng.gen_bool(0.1) { 1.0 } else { 10.0 };
            (
                id,
                LinkSpeeds {
                    download_mbps: 50.0,
                    upload_mbps: upload,
                },
            )
        })
        .collect();

    let mut network = SimNetwork::new(50);
    for &id in &ids {
        let out_peers: Vec<PeerId> = edges
            .iter()
            .filter(|(dialer, _)| *dialer == id)
            .map(|(_, target)| *target)
            .collect();
        let config = NodeConfig {
            settings: ProtocolSettings::default(),
            tx_interval_seconds: Some(60.0),
            time_to_run_seconds,
            link: speeds.get(&id).copied().unwrap_or_default(),
            seed: rng.gen(),
            ..Default::default()
        };
        config.validate()?;
        let stats = Rc::new(RefCell::new(NodeStatistics::new(id)));
        network.add_node(RelayNode::new(id, config, out_peers, speeds.clone(), stats));
    }

    network.start();
    network.run_until((time_to_run_seconds * 1000.0) as u64 + 60_000);
    network.stop();

    let total = network.total_statistics();
    info!("seed = {:#x}", seed);
    info!(
        "nodes {} links {}: created {} received {} (mean latency {:.0} ms)",
        num_of_nodes,
        edges.len(),
        total.tx_created,
        total.tx_received,
        total.mean_latency().unwrap_or(0.0)
    );
    info!(
        "inv received {} ({} useless), bytes sent {}",
        total.inv_received, total.useless_inv_received, total.bytes_sent
    );
    Ok(())
}
