//! Benchmarks for composition planning and hint derivation
//!
//! Planning runs before every compose and hints after every discovery, so
//! both should stay well under a millisecond for realistic pods.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pod_resource_manager::allocation::{
    CompositionPlanner, LocalStorage, ManagedNetwork, NetworkInventory, PlanningInventory,
};
use pod_resource_manager::capacity::{CapacityCalculator, PodTotals};
use pod_resource_manager::domain::{
    BlockDevice, Capability, ComposeRequest, DiscoveredMachine, Hints, LogicalVolume,
    PowerParameters, PowerState, RequestedBlockDevice, RequestedInterface, StoragePool,
    StoragePoolType, TargetRef, VolumeGroup,
};
use pod_resource_manager::inventory::GIB;

fn pools(count: usize) -> Vec<StoragePool> {
    (0..count)
        .map(|i| StoragePool {
            id: format!("pool-{}", i),
            name: format!("pool{}", i),
            pool_type: StoragePoolType::Dir,
            path: format!("/var/lib/libvirt/pool{}", i),
            storage: 500 * GIB,
            available: (i as u64 + 1) * 10 * GIB,
        })
        .collect()
}

fn volume_group(volumes: usize) -> VolumeGroup {
    VolumeGroup {
        id: "1".into(),
        path: "redfish/v1/Services/1/LogicalDrives/1".into(),
        capacity: 4096 * GIB,
        logical_volumes: (0..volumes)
            .map(|i| LogicalVolume {
                id: (i + 2).to_string(),
                path: format!("redfish/v1/Services/1/LogicalDrives/{}", i + 2),
                capacity: 10 * GIB,
                targets: vec![TargetRef {
                    id: format!("t{}", i),
                    in_use: i % 2 == 0,
                }],
            })
            .collect(),
    }
}

fn inventory() -> PlanningInventory {
    PlanningInventory {
        capabilities: vec![
            Capability::Composable,
            Capability::DynamicLocalStorage,
            Capability::StoragePools,
            Capability::IscsiStorage,
        ],
        architectures: vec!["amd64/generic".into()],
        hints: Hints {
            cores: 64,
            cpu_speed: 2400,
            memory: 256 * 1024,
            local_storage: 5000 * GIB as i64,
            local_disks: None,
            iscsi_storage: Some(2048 * GIB as i64),
        },
        local_storage: LocalStorage::Pools {
            pools: pools(32),
            default_pool: None,
        },
        volume_groups: vec![volume_group(64)],
        networks: Some(NetworkInventory {
            networks: vec![ManagedNetwork {
                name: "maas".into(),
                dhcp_active: false,
                bridge: Some("virbr1".into()),
            }],
            host_interfaces: Vec::new(),
        }),
    }
}

fn request() -> ComposeRequest {
    ComposeRequest {
        hostname: None,
        architecture: "amd64/generic".into(),
        cores: 4,
        cpu_speed: None,
        memory: 8192,
        block_devices: vec![
            RequestedBlockDevice {
                size: 100 * GIB,
                tags: vec!["pool30".into()],
            },
            RequestedBlockDevice {
                size: 20 * GIB,
                tags: vec!["iscsi".into()],
            },
            RequestedBlockDevice {
                size: 50 * GIB,
                tags: vec!["local".into()],
            },
        ],
        interfaces: vec![RequestedInterface {
            ifname: None,
            attach_type: None,
            attach_name: Some("maas".into()),
        }],
        known_host_interfaces: Vec::new(),
    }
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("planner");
    group.throughput(Throughput::Elements(1));

    let planner = CompositionPlanner::new();
    let inventory = inventory();
    let request = request();
    group.bench_function("plan_three_disks", |b| {
        b.iter(|| planner.plan(black_box(&request), black_box(&inventory)))
    });

    group.finish();
}

fn bench_hints(c: &mut Criterion) {
    let mut group = c.benchmark_group("hints");

    let machines: Vec<DiscoveredMachine> = (0..1000)
        .map(|i| DiscoveredMachine {
            hostname: format!("vm{}", i),
            architecture: "amd64/generic".into(),
            cores: 2,
            cpu_speed: 2400,
            memory: 2048,
            power_state: PowerState::Off,
            power_parameters: PowerParameters::new(),
            block_devices: vec![BlockDevice::local(20 * GIB)],
            interfaces: Vec::new(),
            tags: Vec::new(),
        })
        .collect();
    let totals = PodTotals {
        cores: 4096,
        cpu_speed: 2400,
        memory: 4096 * 1024,
        local_storage: 40_000 * GIB,
        local_disks: None,
    };
    let groups = vec![volume_group(256)];
    group.throughput(Throughput::Elements(machines.len() as u64));

    group.bench_function("hints_1000_machines", |b| {
        let calculator = CapacityCalculator::new().with_iscsi();
        b.iter(|| calculator.hints(black_box(&totals), black_box(&machines), black_box(&groups)))
    });

    group.finish();
}

criterion_group!(benches, bench_plan, bench_hints);
criterion_main!(benches);
