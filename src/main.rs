use raftkv::cli::Cli;
use raftkv::config::Config;
use raftkv::transport::UdpCluster;
use raftkv::Replica;

fn main() {
    env_logger::init();

    let (port, id, peers) = match Cli::parsed() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("raftkv: {e}");
            std::process::exit(1);
        }
    };

    let cluster = match UdpCluster::bind(port, id.clone(), &peers) {
        Ok(cluster) => cluster,
        Err(e) => {
            eprintln!("raftkv: failed to bind port {port}: {e}");
            std::process::exit(1);
        }
    };

    log::info!("starting replica {id} on port {port} with peers {peers:?}");

    let config = Config::from_env();
    let mut replica = Replica::new(id, peers, cluster, config);
    replica.announce_hello();
    replica.run();
}
