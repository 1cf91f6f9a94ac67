use pathpilot_core::features::{self, WorldState};
use pathpilot_core::grid::TILE;
use pathpilot_core::{InferenceController, Network, RayCaster, TileGrid, Topology, Vec2};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use std::time::Instant;

fn build_level(width: usize, height: usize) -> TileGrid {
    let mut rng = ChaCha12Rng::seed_from_u64(7);
    let rows: Vec<String> = (0..height)
        .map(|y| {
            (0..width)
                .map(|x| {
                    if y == 0 || y == height - 1 || x == 0 || x == width - 1 {
                        '1'
                    } else if y == height - 2 && x == 1 {
                        'P'
                    } else if y == 1 && x == width - 2 {
                        'T'
                    } else if rng.random_bool(0.08) {
                        '1'
                    } else {
                        '0'
                    }
                })
                .collect()
        })
        .collect();
    TileGrid::from_rows(&rows)
}

fn sample_states(grid: &TileGrid, count: usize) -> Vec<WorldState> {
    let mut rng = ChaCha12Rng::seed_from_u64(42);
    let (w, h) = (grid.width() as f32 * TILE, grid.height() as f32 * TILE);
    let target = grid.target().unwrap_or(Vec2::ZERO);
    (0..count)
        .map(|_| WorldState {
            player_position: Vec2::new(rng.random_range(TILE..w - 2.0 * TILE), rng.random_range(TILE..h - 2.0 * TILE)),
            player_velocity: Vec2::new(rng.random_range(-200.0..200.0), rng.random_range(-200.0..200.0)),
            energy: rng.random_range(0.0..150.0),
            grounded: rng.random_bool(0.5),
            target,
        })
        .collect()
}

fn main() {
    let grid = build_level(90, 90);
    let states = sample_states(&grid, 2_000);
    let caster = RayCaster::default();
    let mut rng = ChaCha12Rng::seed_from_u64(1);
    let network = Network::xavier(Topology::standard(), &mut rng);
    println!(
        "Benchmarking {} frames on a {}x{} level, model {} ({} parameters)",
        states.len(),
        grid.width(),
        grid.height(),
        network.topology(),
        network.parameter_count()
    );

    let start = Instant::now();
    let mut vectors = Vec::with_capacity(states.len());
    for state in &states {
        match features::extract_from_world(state, &grid, &caster) {
            Ok(v) => vectors.push(v),
            Err(e) => println!("feature extraction failed: {e}"),
        }
    }
    let extraction = start.elapsed();
    println!("Feature extraction: {:?} total, {:?} per frame", extraction, extraction / states.len() as u32);

    let start = Instant::now();
    let mut checksum = 0.0f32;
    for v in &vectors {
        if let Ok(out) = network.forward(v.as_slice()) {
            checksum += out.iter().sum::<f32>();
        }
    }
    let forward = start.elapsed();
    println!("Forward pass: {:?} total, {:?} per frame", forward, forward / vectors.len().max(1) as u32);

    let mut controller = InferenceController::new(3);
    if let Err(e) = controller.set_model(network) {
        println!("controller rejected model: {e}");
        return;
    }
    let start = Instant::now();
    let mut moving = 0usize;
    for state in &states {
        if controller.decide(state, &grid).move_x != 0 {
            moving += 1;
        }
    }
    let decide = start.elapsed();
    println!("Full decision: {:?} total, {:?} per frame", decide, decide / states.len() as u32);
    println!("({} of {} decisions moved, checksum {:.3})", moving, states.len(), checksum);
}
