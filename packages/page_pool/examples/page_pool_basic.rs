//! Basic usage of the `page_pool` crate:
//!
//! * Placing simulation entities into a bounded pool, with a growable pool as overflow.
//! * Returning entities to their pool.
//! * Allocating and freeing contiguous ranges with a stable-position allocator.

use page_pool::{ChunkedFixedPool, Error, GrowablePagePool, PagePool, StablePositionAllocator};

#[derive(Debug)]
#[allow(dead_code, reason = "fields are only read through Debug")]
struct Projectile {
    position: [f32; 3],
    velocity: [f32; 3],
}

impl Projectile {
    fn launched(speed: f32) -> Self {
        Self {
            position: [0.0; 3],
            velocity: [speed, 0.0, 0.0],
        }
    }
}

fn main() {
    // Two chunks of eight pages each, 32 bytes per page.
    let mut projectiles = ChunkedFixedPool::<32, 2, 8>::new();
    let mut overflow = GrowablePagePool::<32>::new();

    let mut in_flight = Vec::new();

    for i in 0..20_u8 {
        // Once the bounded pool is full, the rest lands in the overflow pool.
        let placed = match projectiles.alloc(Projectile::launched(f32::from(i))) {
            Ok(ptr) => (ptr, false),
            Err(Error::Exhausted { capacity }) => {
                println!("Bounded pool of {capacity} pages is full, using overflow pool");

                let ptr = overflow
                    .alloc(Projectile::launched(f32::from(i)))
                    .expect("growable pool never runs out");

                (ptr, true)
            }
            Err(e) => panic!("unexpected allocation failure: {e}"),
        };

        in_flight.push(placed);
    }

    println!(
        "{} projectiles in the bounded pool, {} in the overflow pool",
        projectiles.len(),
        overflow.len()
    );

    // SAFETY: The pointer came from the pool and the projectile has not been freed yet.
    let first = unsafe { in_flight[0].0.as_ref() };
    println!("First projectile: {first:?}");

    for (ptr, in_overflow) in in_flight {
        // SAFETY: Every projectile is returned exactly once to the pool it came from.
        unsafe {
            if in_overflow {
                overflow.free_typed(ptr);
            } else {
                projectiles.free_typed(ptr);
            }
        }
    }

    // Vertex ranges for a batch of meshes keep their positions for as long as they live.
    let mut vertices = StablePositionAllocator::<[f32; 3]>::new();

    let cube = vertices.allocate(8);
    let triangle = vertices.allocate(3);
    let quad = vertices.allocate(4);

    vertices[triangle + 1] = [1.0, 0.0, 0.0];

    // The triangle leaves a gap in the middle, which the next fitting range reuses.
    vertices.free(triangle, 3);
    let line = vertices.allocate(2);

    println!(
        "cube at {cube}, quad at {quad}, line reused position {line} of the freed triangle, {} vertices in total",
        vertices.len()
    );

    vertices.free(line, 2);
    vertices.free(quad, 4);
    vertices.free(cube, 8);
    vertices.reset();
}
