#[macro_use]
extern crate criterion;

use criterion::{black_box, Criterion};
use std::time::{Duration, Instant};
use t5_translate::pipelines::batching::translate_lines;
use t5_translate::pipelines::translation::{Language, TranslationConfig, TranslationModel};
use t5_translate::resources::RemoteResource;
use t5_translate::t5::{T5ConfigResources, T5ModelResources, T5VocabResources};
use tch::Device;

fn translation_config() -> TranslationConfig {
    TranslationConfig::new(
        RemoteResource::from_pretrained(T5ModelResources::T5_SMALL),
        RemoteResource::from_pretrained(T5ConfigResources::T5_SMALL),
        RemoteResource::from_pretrained(T5VocabResources::T5_SMALL),
        Language::English,
        Language::German,
        Device::cuda_if_available(),
    )
}

fn create_translation_model() -> TranslationModel {
    TranslationModel::new(translation_config()).unwrap()
}

fn translation_forward_pass(iters: u64, model: &TranslationModel, data: &[String]) -> Duration {
    let mut duration = Duration::new(0, 0);
    for _i in 0..iters {
        let mut output: Vec<u8> = Vec::new();
        let start = Instant::now();
        let _ = translate_lines(model, data, 16, &mut output);
        duration = duration.checked_add(start.elapsed()).unwrap();
    }
    duration
}

fn translation_load_model(iters: u64) -> Duration {
    let mut duration = Duration::new(0, 0);
    for _i in 0..iters {
        let start = Instant::now();
        let _ = create_translation_model();
        duration = duration.checked_add(start.elapsed()).unwrap();
    }
    duration
}

fn bench_translation(c: &mut Criterion) {
    //    Set-up translation model
    unsafe {
        torch_sys::dummy_cuda_dependency();
    }
    let model = create_translation_model();

    //    Define input
    let input = [
        "In findings published Tuesday in Cornell University's arXiv by a team of scientists from the University of Montreal and a separate report published Wednesday in Nature Astronomy by a team from University College London (UCL), the presence of water vapour was confirmed in the atmosphere of K2-18b, a planet circling a star in the constellation Leo.",
        "This is the first such discovery in a planet in its star's habitable zone, not too hot and not too cold for liquid water to exist.",
        "The Montreal team, led by Björn Benneke, used data from the NASA's Hubble telescope to assess changes in the light coming from K2-18b's star as the planet passed between it and Earth.",
        "They found that certain wavelengths of light, which are usually absorbed by water, weakened when the planet was in the way, indicating not only does K2-18b have an atmosphere, but the atmosphere contains water in vapour form.",
        "The team from UCL then analyzed the Montreal team's data using their own software and confirmed their conclusion.",
        "This was not the first time scientists have found signs of water on an exoplanet, but previous discoveries were made on planets with high temperatures or other pronounced differences from Earth.",
        "This is the first potentially habitable planet where the temperature is right and where we now know there is water, said UCL astronomer Angelos Tsiaras.",
        "It's the best candidate for habitability right now.",
        "It's a good sign, said Ryan Cloutier of the Harvard-Smithsonian Center for Astrophysics, who was not one of either study's authors.",
        "Overall, he continued, the presence of water in its atmosphere certainly improves the prospect of K2-18b being a potentially habitable planet, but further observations will be required to say for sure.",
    ]
    .iter()
    .map(|line| format!(" {}", line))
    .collect::<Vec<String>>();

    c.bench_function("Translation forward pass", |b| {
        b.iter_custom(|iters| black_box(translation_forward_pass(iters, &model, &input)))
    });

    c.bench_function("Load model", |b| {
        b.iter_custom(|iters| black_box(translation_load_model(iters)))
    });
}

criterion_group! {
name = benches;
config = Criterion::default().sample_size(10);
targets = bench_translation
}

criterion_main!(benches);
