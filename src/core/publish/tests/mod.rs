mod stage_tests;
