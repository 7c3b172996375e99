//! Matrix-multiply driver: the coordinator seeds operand tuples and control
//! tokens, eval'd workers race for the tokens and publish one product tuple
//! per cell.

use std::sync::Arc;

use linda::query::formal;
use linda::runtime::{Options, Runtime};
use linda::transport::local::LocalMesh;
use linda::{query, tuple};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SIZE: i32 = 8;

linda::register_function! {
    fn mx_worker(a: String, b: String, c: String) -> i64 {
        let rt = linda::current();
        let width = rt.rd(&query!("W", formal::<i32>())).get::<i32>(1).unwrap();
        let height = rt.rd(&query!("H", formal::<i32>())).get::<i32>(1).unwrap();

        for i in 0..width {
            for j in 0..height {
                // the control token decides which worker owns this cell
                if rt.inp(&query!("<", i, j)).is_none() {
                    continue;
                }
                let mut value = 0i64;
                for k in 0..width {
                    let lhs = rt
                        .rd(&query!(a.as_str(), i, k, formal::<i64>()))
                        .get::<i64>(3)
                        .unwrap();
                    let rhs = rt
                        .rd(&query!(b.as_str(), k, j, formal::<i64>()))
                        .get::<i64>(3)
                        .unwrap();
                    value += lhs * rhs;
                }
                rt.out(tuple!(c.as_str(), i, j, value)).unwrap();
            }
        }
        0i64
    }
}

#[test]
fn distributed_matrix_multiply() {
    let workers = 2;
    let options = Options::default().with_worker_threads(4);
    let rts: Vec<Runtime> = LocalMesh::new(workers + 1)
        .into_iter()
        .map(|node| Runtime::new(Arc::new(node), options.clone()).unwrap())
        .collect();
    let coordinator = &rts[0];

    coordinator.out(tuple!("W", SIZE)).unwrap();
    coordinator.out(tuple!("H", SIZE)).unwrap();

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut lhs = vec![vec![0i64; SIZE as usize]; SIZE as usize];
    let mut rhs = vec![vec![0i64; SIZE as usize]; SIZE as usize];
    for i in 0..SIZE {
        for j in 0..SIZE {
            lhs[i as usize][j as usize] = rng.gen_range(0..100);
            rhs[i as usize][j as usize] = rng.gen_range(0..100);
            coordinator
                .out(tuple!("A", i, j, lhs[i as usize][j as usize]))
                .unwrap();
            coordinator
                .out(tuple!("B", i, j, rhs[i as usize][j as usize]))
                .unwrap();
        }
    }
    for i in 0..SIZE {
        for j in 0..SIZE {
            coordinator.out(tuple!("<", i, j)).unwrap();
        }
    }

    for _ in 0..workers {
        linda::eval!(
            coordinator,
            "computed",
            mx_worker(String::from("A"), String::from("B"), String::from("C"))
        )
        .unwrap();
    }
    for _ in 0..workers {
        coordinator.in_(&query!("computed", 0i64));
    }

    // exactly one product tuple per cell, carrying the expected value
    for i in 0..SIZE {
        for j in 0..SIZE {
            let expected: i64 = (0..SIZE)
                .map(|k| lhs[i as usize][k as usize] * rhs[k as usize][j as usize])
                .sum();
            assert_eq!(
                coordinator.inp(&query!("C", i, j, formal::<i64>())),
                Some(tuple!("C", i, j, expected)),
                "cell ({i}, {j})"
            );
            assert_eq!(coordinator.inp(&query!("C", i, j, formal::<i64>())), None);
        }
    }
}
