pub mod wav_sink;
