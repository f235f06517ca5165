use ndarray::{Array2, Array3};
use rasterblock::{
    Backend, BlockContext, BlockInputs, BlockOutputs, CallbackError, Communicator, CreateOptions,
    DataType, Dimensions, Error, GeoTransform, InputFiles, InputSlot, Job, JobConfig,
    LocalCommunicator, MemoryDataset, MemoryDriver, OutputFiles, ParticipantEnv, PixelRect,
    RasterBlock, RasterDriver, RawDriver,
};
use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const SIZE: usize = 10;

fn write_ramp(path: &Path, reverse: bool) {
    let options = CreateOptions {
        size: Dimensions::new(SIZE, SIZE),
        bands: 1,
        data_type: DataType::U8,
        transform: GeoTransform::north_up(0.0, SIZE as f64, 1.0, 1.0),
        projection: "local".to_string(),
        no_data: None,
    };
    let pixels = Array2::from_shape_fn((SIZE, SIZE), |(r, c)| {
        let col = if reverse { SIZE - 1 - c } else { c };
        (r * SIZE + col) as f64
    });
    let dataset = RawDriver::new().open_for_write(path, &options).unwrap();
    dataset
        .write_window(1, PixelRect::new(0, 0, SIZE, SIZE), pixels.view())
        .unwrap();
}

fn average(
    _ctx: &BlockContext<'_>,
    inputs: &BlockInputs,
    outputs: &mut BlockOutputs,
) -> Result<(), CallbackError> {
    let blocks = inputs.get("image").ok_or("no image input")?;
    let mut sum: Array3<f64> = blocks[0].data().clone();
    for block in &blocks[1..] {
        sum += block.data();
    }
    sum /= blocks.len() as f64;
    outputs.insert("average", RasterBlock::new(blocks[0].data_type(), sum));
    Ok(())
}

struct Ramps {
    dir: TempDir,
    inputs: InputFiles,
}

impl Ramps {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let ramp = dir.path().join("ramp1.raw");
        let mirror = dir.path().join("ramp2.raw");
        write_ramp(&ramp, false);
        write_ramp(&mirror, true);

        let mut inputs = InputFiles::new();
        inputs.insert("image".to_string(), vec![ramp, mirror]);
        Self { dir, inputs }
    }

    fn outputs(&self, name: &str) -> (PathBuf, OutputFiles) {
        let path = self.dir.path().join(name);
        let mut outputs = OutputFiles::new();
        outputs.insert("average".to_string(), path.clone());
        (path, outputs)
    }

    fn run(&self, name: &str, config: JobConfig) -> Vec<u8> {
        let (path, outputs) = self.outputs(name);
        let mut job = Job::new(Arc::new(RawDriver::new()), &self.inputs, outputs, config).unwrap();
        let summary = job.run(average).unwrap();
        assert_eq!(summary.blocks_processed, summary.total_blocks);
        fs::read(path).unwrap()
    }
}

#[test]
fn test_average_of_ramp_and_mirror() {
    let ramps = Ramps::new();
    let bytes = ramps.run("avg.raw", JobConfig::default().with_window(4, 4));

    assert_eq!(bytes.len(), SIZE * SIZE);
    // (0 + 9) / 2 truncated to u8
    assert_eq!(bytes[0], 4);
    for r in 0..SIZE {
        for c in 0..SIZE {
            let expected = ((r * SIZE + c) + (r * SIZE + SIZE - 1 - c)) / 2;
            assert_eq!(bytes[r * SIZE + c] as usize, expected, "pixel ({}, {})", r, c);
        }
    }
}

#[test]
fn test_window_size_does_not_change_output() {
    let ramps = Ramps::new();
    let small = ramps.run("small.raw", JobConfig::default().with_window(4, 4));
    let whole = ramps.run("whole.raw", JobConfig::default().with_window(10, 10));
    let odd = ramps.run("odd.raw", JobConfig::default().with_window(3, 7));
    assert_eq!(small, whole);
    assert_eq!(small, odd);
}

#[test]
fn test_overlap_does_not_change_output() {
    let ramps = Ramps::new();
    let plain = ramps.run("plain.raw", JobConfig::default().with_window(4, 4));
    let overlapped = ramps.run(
        "overlap.raw",
        JobConfig::default().with_window(4, 4).with_overlap(2),
    );
    assert_eq!(plain, overlapped);
}

#[test]
fn test_backends_produce_identical_output() {
    let ramps = Ramps::new();
    let serial = ramps.run("serial.raw", JobConfig::default().with_window(4, 4));
    let pool = ramps.run(
        "pool.raw",
        JobConfig::default()
            .with_window(4, 4)
            .with_backend(Backend::Pool { workers: Some(3) }),
    );
    assert_eq!(serial, pool);

    let (path, outputs) = ramps.outputs("distributed.raw");
    let handles: Vec<_> = LocalCommunicator::group(2)
        .into_iter()
        .map(|comm| {
            let inputs = ramps.inputs.clone();
            let outputs = outputs.clone();
            thread::spawn(move || {
                let config = JobConfig::default().with_window(4, 4);
                let mut job = Job::new(Arc::new(RawDriver::new()), &inputs, outputs, config)
                    .unwrap()
                    .with_communicator(Box::new(comm));
                job.run(average).unwrap()
            })
        })
        .collect();

    let processed: usize = handles
        .into_iter()
        .map(|h| h.join().unwrap().blocks_processed)
        .sum();
    assert_eq!(processed, 9);
    assert_eq!(fs::read(path).unwrap(), serial);
}

#[test]
fn test_tcp_participants_match_serial() {
    let ramps = Ramps::new();
    let serial = ramps.run("serial.raw", JobConfig::default().with_window(3, 3));

    let coordinator = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let (path, outputs) = ramps.outputs("tcp.raw");

    let handles: Vec<_> = (0..2)
        .map(|rank| {
            let inputs = ramps.inputs.clone();
            let outputs = outputs.clone();
            let env = ParticipantEnv {
                rank,
                size: 2,
                coordinator: coordinator.clone(),
            };
            thread::spawn(move || {
                let comm = rasterblock::comm::connect(&env, Duration::from_secs(10)).unwrap();
                assert_eq!((comm.rank(), comm.size()), (rank, 2));
                let config = JobConfig::default().with_window(3, 3);
                let mut job = Job::new(Arc::new(RawDriver::new()), &inputs, outputs, config)
                    .unwrap()
                    .with_communicator(comm);
                job.run(average).unwrap()
            })
        })
        .collect();

    let processed: Vec<usize> = handles
        .into_iter()
        .map(|h| h.join().unwrap().blocks_processed)
        .collect();
    // 16 blocks, even linear indices on rank 0
    assert_eq!(processed, vec![8, 8]);
    assert_eq!(fs::read(path).unwrap(), serial);
}

#[test]
fn test_overlap_not_smaller_than_window_is_rejected() {
    let ramps = Ramps::new();
    let (_, outputs) = ramps.outputs("never.raw");
    let calls = AtomicUsize::new(0);

    let result = Job::new(
        Arc::new(RawDriver::new()),
        &ramps.inputs,
        outputs,
        JobConfig::default().with_window(4, 4).with_overlap(4),
    )
    .and_then(|mut job| {
        job.run(|_, _, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });

    assert!(matches!(result, Err(Error::Configuration(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_global_statistics_computed_once_per_participant() {
    let driver = MemoryDriver::new();
    let source = driver.insert(
        MemoryDataset::from_bands(
            "image.mem",
            DataType::F32,
            GeoTransform::north_up(0.0, 8.0, 1.0, 1.0),
            "local",
            vec![Array2::from_shape_fn((8, 8), |(r, c)| (r * 8 + c) as f64)],
        )
        .unwrap(),
    );

    let mut inputs = InputFiles::new();
    inputs.insert("image".to_string(), vec![PathBuf::from("image.mem")]);
    let mut outputs = OutputFiles::new();
    outputs.insert("stretched".to_string(), PathBuf::from("stretched.mem"));

    let mut job = Job::new(
        Arc::new(driver.clone()),
        &inputs,
        outputs,
        JobConfig::default().with_window(2, 2),
    )
    .unwrap();
    job.run(|ctx, inputs, outputs| {
        let slot = InputSlot::new("image", 0);
        let stats = ctx.global_statistics(slot, 1, None)?;
        let block = inputs.block(slot).ok_or("no image input")?;
        let scaled = block.data().mapv(|v| (v - stats.min) / (stats.max - stats.min));
        outputs.insert("stretched", RasterBlock::new(DataType::F32, scaled));
        Ok(())
    })
    .unwrap();

    assert_eq!(source.statistics_calls(), 1);
    let cache = job.cache().stats();
    assert_eq!(cache.misses, 1);
    assert_eq!(cache.hits, 15);

    let stretched = driver.dataset("stretched.mem").unwrap().band(1).unwrap();
    assert_eq!(stretched[[0, 0]], 0.0);
    assert_eq!(stretched[[7, 7]], 1.0);
}
